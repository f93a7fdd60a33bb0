//! Append-only record of operational events for one cycle

use crate::types::{Component, EntityId, EventRecord, Severity};

/// Append-only event log
///
/// Records are never mutated or removed; `flush` hands the whole sequence off
/// and leaves an empty log behind.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and mirrors it to tracing
    pub fn record(&mut self, event: EventRecord) {
        match event.severity() {
            Severity::Info => tracing::info!(
                source = event.source().as_str(),
                entity = event.entity().map(|id| id.0),
                "{}",
                event.message()
            ),
            Severity::Error => tracing::warn!(
                source = event.source().as_str(),
                entity = event.entity().map(|id| id.0),
                context = ?event.context(),
                "{}",
                event.message()
            ),
        }
        self.events.push(event);
    }

    /// Appends an info event
    pub fn info(&mut self, source: Component, message: impl Into<String>) {
        self.record(EventRecord::new(Severity::Info, source, message));
    }

    /// Appends an error event
    pub fn error(&mut self, source: Component, message: impl Into<String>) {
        self.record(EventRecord::new(Severity::Error, source, message));
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_error()).count()
    }

    /// Error events that reference the given entity
    pub fn errors_for(&self, entity: EntityId) -> impl Iterator<Item = &EventRecord> {
        self.events
            .iter()
            .filter(move |e| e.is_error() && e.entity() == Some(entity))
    }

    /// Takes every recorded event, in append order
    pub fn flush(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.events)
    }
}
