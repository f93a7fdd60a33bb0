//! Persistence collaborator boundary
//!
//! The core never stores anything itself. After every cycle it hands the
//! snapshot (on success) and the cycle's events to a [`SnapshotSink`].

use crate::{
    error::SinkError,
    types::{EventRecord, JoinedSnapshot},
};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Trait for downstream storage of cycle results
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Stores the output of a completed cycle
    async fn persist_snapshot(
        &self,
        snapshot: &JoinedSnapshot,
        events: &[EventRecord],
    ) -> Result<(), SinkError>;

    /// Stores the events of a failed cycle
    async fn persist_events(&self, events: &[EventRecord]) -> Result<(), SinkError>;
}

/// In-memory sink that keeps every hand-off
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<JoinedSnapshot>>,
    events: Mutex<Vec<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots received so far, oldest first
    pub async fn snapshots(&self) -> Vec<JoinedSnapshot> {
        self.snapshots.lock().await.clone()
    }

    /// Event batches received so far, one per cycle
    pub async fn event_batches(&self) -> Vec<Vec<EventRecord>> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    async fn persist_snapshot(
        &self,
        snapshot: &JoinedSnapshot,
        events: &[EventRecord],
    ) -> Result<(), SinkError> {
        self.snapshots.lock().await.push(snapshot.clone());
        self.events.lock().await.push(events.to_vec());
        Ok(())
    }

    async fn persist_events(&self, events: &[EventRecord]) -> Result<(), SinkError> {
        self.events.lock().await.push(events.to_vec());
        Ok(())
    }
}
