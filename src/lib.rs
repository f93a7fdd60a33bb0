//! # Crypto Market Ingestion SDK
//!
//! Pulls cryptocurrency market data from a rate-limited provider API
//! (CoinMarketCap v2 by default) and joins it into one snapshot per cycle.
//!
//! A cycle fetches three endpoint families:
//!
//! - **listing**: every tracked entity, paged
//! - **global**: market-wide aggregates, refreshed every N cycles and cached
//! - **ticker**: per-entity quotes, one call per listed entity
//!
//! Every request shares one sliding-window [`RateLimiter`] kept below the
//! provider's hard cap. Per-entity failures never abort a cycle; they become
//! [`EventRecord`]s handed downstream alongside the snapshot.
//!
//! ## Usage
//!
//! ```no_run
//! use crypto_ingest_sdk::{CycleController, IngestConfig, MemorySink};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_path("ingest.yaml")?;
//! let mut controller = CycleController::new(&config)?;
//! let sink = MemorySink::new();
//!
//! let outcome = controller
//!     .run_cycle_and_hand_off(&sink, &CancellationToken::new())
//!     .await;
//! if let Some(snapshot) = outcome.snapshot() {
//!     println!("{} rows", snapshot.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod cycle;
pub mod endpoint;
pub mod error;
pub mod event_log;
pub mod fetcher;
pub mod joiner;
pub mod metrics;
pub mod providers;
pub mod rate_limiter;
pub mod sink;
pub mod types;

// Re-export commonly used types
pub use config::IngestConfig;
pub use cycle::{CycleController, CycleOutcome, CycleState};
pub use endpoint::{EndpointPayload, EndpointRequest, MarketDataEndpoint};
pub use error::{EndpointError, IngestError, SinkError};
pub use event_log::EventLog;
pub use metrics::EndpointMetrics;
pub use rate_limiter::RateLimiter;
pub use sink::{MemorySink, SnapshotSink};
pub use types::{
    EntityId, EventRecord, GlobalRecord, JoinedRow, JoinedSnapshot, ListingRecord, Severity,
    TickerRecord,
};
