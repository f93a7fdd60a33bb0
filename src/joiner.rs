//! Joins the three endpoint families into one snapshot

use crate::{
    error::IngestError,
    event_log::EventLog,
    types::{
        Component, EntityId, EventRecord, GlobalRecord, JoinedRow, JoinedSnapshot, ListingRecord,
        Severity, TickerRecord,
    },
};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Inputs of one join
#[derive(Debug, Clone, Copy)]
pub struct JoinInput<'a> {
    pub cycle: u64,
    pub listing: &'a [ListingRecord],
    /// Most recent global record, fetched this cycle or cached
    pub global: Option<&'a GlobalRecord>,
    pub global_refreshed: bool,
    pub tickers: &'a [TickerRecord],
}

/// Checks that no entity id appears twice in the listing
///
/// Records one error event for the first repeated id found.
pub fn check_unique(listing: &[ListingRecord], log: &mut EventLog) -> Result<(), IngestError> {
    let mut seen: HashSet<EntityId> = HashSet::with_capacity(listing.len());
    for record in listing {
        if !seen.insert(record.id) {
            let err = IngestError::duplicate_entity(record.id);
            log.record(
                EventRecord::new(Severity::Error, Component::Joiner, err.to_string())
                    .with_entity(record.id)
                    .with_context(json!({ "symbol": record.symbol, "name": record.name })),
            );
            return Err(err);
        }
    }
    Ok(())
}

/// Builds the joined snapshot
///
/// Rows are seeded from the listing in listing order. Tickers are merged by
/// id; tickers for unlisted ids are dropped with one error event each. The
/// global record, if any, is broadcast onto every row.
///
/// # Returns
/// The snapshot, or `DataIntegrity` when the listing repeats an id
pub fn join(input: JoinInput<'_>, log: &mut EventLog) -> Result<JoinedSnapshot, IngestError> {
    check_unique(input.listing, log)?;

    let mut rows: Vec<JoinedRow> = input.listing.iter().map(JoinedRow::from_listing).collect();
    let index: HashMap<EntityId, usize> = rows
        .iter()
        .enumerate()
        .map(|(position, row)| (row.id, position))
        .collect();

    let mut merged = 0usize;
    for ticker in input.tickers {
        let Some(&position) = index.get(&ticker.id) else {
            log.record(
                EventRecord::new(
                    Severity::Error,
                    Component::Joiner,
                    format!("dropped ticker for entity {} missing from the listing", ticker.id),
                )
                .with_entity(ticker.id),
            );
            continue;
        };

        let row = &mut rows[position];
        if row.has_ticker() {
            log.record(
                EventRecord::new(
                    Severity::Info,
                    Component::Joiner,
                    format!("replaced earlier ticker for entity {}", ticker.id),
                )
                .with_entity(ticker.id),
            );
        } else {
            merged += 1;
        }
        row.apply_ticker(ticker);
    }

    if let Some(global) = input.global {
        for row in rows.iter_mut() {
            row.apply_global(global);
        }
    }

    tracing::debug!(
        cycle = input.cycle,
        rows = rows.len(),
        with_ticker = merged,
        with_global = input.global.is_some(),
        "Joined snapshot"
    );
    log.info(
        Component::Joiner,
        format!(
            "joined {} rows, {} with ticker data, {} without",
            rows.len(),
            merged,
            rows.len() - merged
        ),
    );

    Ok(JoinedSnapshot {
        cycle: input.cycle,
        created_at: Utc::now(),
        global_refreshed: input.global_refreshed,
        rows,
    })
}
