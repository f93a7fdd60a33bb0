//! Ingestion cycle controller
//!
//! Drives one cycle through
//! `Idle → FetchingListing → FetchingGlobal (optional) → FetchingTickers → Joining → Done`,
//! with `Failed` reachable from any stage on a fatal error or cancellation.

use crate::{
    config::{IngestConfig, ScheduleConfig},
    endpoint::MarketDataEndpoint,
    error::IngestError,
    event_log::EventLog,
    fetcher::{FetchSettings, Fetcher},
    joiner::{self, JoinInput},
    providers::CoinMarketCapClient,
    rate_limiter::RateLimiter,
    sink::SnapshotSink,
    types::{Component, EntityId, EventRecord, GlobalRecord, JoinedSnapshot, Severity},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Stage of the current (or last) cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchingListing,
    FetchingGlobal,
    FetchingTickers,
    Joining,
    Done,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::FetchingListing => "fetching_listing",
            CycleState::FetchingGlobal => "fetching_global",
            CycleState::FetchingTickers => "fetching_tickers",
            CycleState::Joining => "joining",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
        }
    }
}

/// Result of one cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// Every stage ran; the snapshot is complete
    Completed {
        snapshot: JoinedSnapshot,
        events: Vec<EventRecord>,
    },
    /// A fatal error stopped the cycle; no snapshot is emitted
    Failed {
        error: IngestError,
        events: Vec<EventRecord>,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }

    pub fn snapshot(&self) -> Option<&JoinedSnapshot> {
        match self {
            CycleOutcome::Completed { snapshot, .. } => Some(snapshot),
            CycleOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&IngestError> {
        match self {
            CycleOutcome::Completed { .. } => None,
            CycleOutcome::Failed { error, .. } => Some(error),
        }
    }

    pub fn events(&self) -> &[EventRecord] {
        match self {
            CycleOutcome::Completed { events, .. } | CycleOutcome::Failed { events, .. } => events,
        }
    }
}

/// Runs ingestion cycles against one endpoint
///
/// The controller owns the cached global record and the cycle counter; the
/// rate limiter is shared by handle so the request budget survives across
/// cycles and can be shared with other controllers of the same process.
pub struct CycleController {
    fetcher: Fetcher,
    global_refresh_every: u32,
    schedule: ScheduleConfig,
    cached_global: Option<GlobalRecord>,
    last_global_refresh: Option<u64>,
    cycles_run: u64,
    state: CycleState,
}

impl CycleController {
    /// Creates a controller talking to the configured CoinMarketCap endpoints
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let endpoint = CoinMarketCapClient::new(&config.endpoints)
            .map_err(|e| IngestError::configuration(format!("cannot build HTTP client: {}", e)))?;
        let limiter = Arc::new(RateLimiter::from_config(config));

        Ok(Self::with_endpoint(config, Arc::new(endpoint), limiter))
    }

    /// Creates a controller with a custom endpoint and limiter
    ///
    /// This is primarily for testing with mock endpoints.
    pub fn with_endpoint(
        config: &IngestConfig,
        endpoint: Arc<dyn MarketDataEndpoint>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        tracing::info!(
            endpoint = endpoint.endpoint_name(),
            max_requests_per_window = limiter.max_requests(),
            window_secs = limiter.window().as_secs(),
            global_refresh_every = config.global.refresh_every_n_cycles,
            "Creating ingestion cycle controller"
        );

        Self {
            fetcher: Fetcher::new(endpoint, limiter, FetchSettings::from(config)),
            global_refresh_every: config.global.refresh_every_n_cycles.max(1),
            schedule: config.schedule.clone(),
            cached_global: None,
            last_global_refresh: None,
            cycles_run: 0,
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycles_run
    }

    /// The most recently fetched global record, if any
    pub fn cached_global(&self) -> Option<&GlobalRecord> {
        self.cached_global.as_ref()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    fn transition(&mut self, next: CycleState) {
        tracing::debug!(
            from = self.state.as_str(),
            to = next.as_str(),
            cycle = self.cycles_run,
            "Cycle state transition"
        );
        self.state = next;
    }

    fn global_due(&self, cycle: u64) -> bool {
        match self.last_global_refresh {
            None => true,
            Some(last) => cycle.saturating_sub(last) >= u64::from(self.global_refresh_every),
        }
    }

    /// Runs one ingestion cycle
    ///
    /// Cancelling `cancel` abandons whatever call or limiter wait is in flight
    /// and fails the cycle with [`IngestError::Cancelled`].
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.cycles_run += 1;
        let cycle = self.cycles_run;
        self.state = CycleState::Idle;

        let mut log = EventLog::new();
        log.info(Component::CycleController, format!("cycle {} started", cycle));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            result = self.run_stages(cycle, &mut log) => result,
        };

        match result {
            Ok(snapshot) => {
                self.transition(CycleState::Done);
                log.info(
                    Component::CycleController,
                    format!(
                        "cycle {} completed: {} rows, {} error event(s)",
                        cycle,
                        snapshot.len(),
                        log.error_count()
                    ),
                );
                CycleOutcome::Completed {
                    snapshot,
                    events: log.flush(),
                }
            }
            Err(error) => {
                log.record(
                    EventRecord::new(
                        Severity::Error,
                        Component::CycleController,
                        format!("cycle {} failed: {}", cycle, error),
                    )
                    .with_context(json!({ "stage": self.state.as_str() })),
                );
                self.transition(CycleState::Failed);
                CycleOutcome::Failed {
                    error,
                    events: log.flush(),
                }
            }
        }
    }

    async fn run_stages(
        &mut self,
        cycle: u64,
        log: &mut EventLog,
    ) -> Result<JoinedSnapshot, IngestError> {
        let delayed_before = self.fetcher.limiter().total_delayed().await;

        self.transition(CycleState::FetchingListing);
        let known_total = self
            .cached_global
            .as_ref()
            .map(|global| global.active_cryptocurrencies);
        let listing = self.fetcher.fetch_listing(known_total, log).await?;
        // Reject repeated ids before spending quota on their tickers
        joiner::check_unique(&listing, log)?;

        let mut global_refreshed = false;
        if self.global_due(cycle) {
            self.transition(CycleState::FetchingGlobal);
            match self.fetcher.fetch_global(log).await {
                Some(record) => {
                    self.cached_global = Some(record);
                    self.last_global_refresh = Some(cycle);
                    global_refreshed = true;
                    log.info(Component::CycleController, "global record refreshed");
                }
                None => match self.last_global_refresh {
                    Some(last) => log.info(
                        Component::CycleController,
                        format!("global refresh failed, reusing record from cycle {}", last),
                    ),
                    None => log.info(
                        Component::CycleController,
                        "no global record available, global columns left empty",
                    ),
                },
            }
        } else if let Some(last) = self.last_global_refresh {
            log.info(
                Component::CycleController,
                format!("global record cache hit (refreshed in cycle {})", last),
            );
        }

        self.transition(CycleState::FetchingTickers);
        let ids: Vec<EntityId> = listing.iter().map(|record| record.id).collect();
        let tickers = self.fetcher.fetch_tickers(&ids, log).await;

        let delayed = self
            .fetcher
            .limiter()
            .total_delayed()
            .await
            .saturating_sub(delayed_before);
        if delayed > 0 {
            log.info(
                Component::RateLimiter,
                format!("{} admission(s) waited for the request window", delayed),
            );
        }

        self.transition(CycleState::Joining);
        joiner::join(
            JoinInput {
                cycle,
                listing: &listing,
                global: self.cached_global.as_ref(),
                global_refreshed,
                tickers: &tickers,
            },
            log,
        )
    }

    /// Runs one cycle and hands its result to the persistence collaborator
    ///
    /// Snapshot and events on success, events only on failure. A sink error
    /// is logged and does not change the outcome.
    pub async fn run_cycle_and_hand_off(
        &mut self,
        sink: &dyn SnapshotSink,
        cancel: &CancellationToken,
    ) -> CycleOutcome {
        let outcome = self.run_cycle(cancel).await;

        let handed_off = match &outcome {
            CycleOutcome::Completed { snapshot, events } => {
                sink.persist_snapshot(snapshot, events).await
            }
            CycleOutcome::Failed { events, .. } => sink.persist_events(events).await,
        };
        if let Err(e) = handed_off {
            tracing::error!(cycle = self.cycles_run, error = %e, "Failed to hand off cycle result");
        }

        outcome
    }

    /// Runs cycles back to back until cancelled
    ///
    /// Waits `schedule.interval_secs` after a completed cycle and
    /// `schedule.error_backoff_secs` after a failed one.
    ///
    /// # Returns
    /// The number of cycles run
    pub async fn run_until_cancelled(
        &mut self,
        sink: &dyn SnapshotSink,
        cancel: &CancellationToken,
    ) -> u64 {
        let mut cycles = 0;
        tracing::info!(
            interval_secs = self.schedule.interval_secs,
            error_backoff_secs = self.schedule.error_backoff_secs,
            "Starting continuous ingestion"
        );

        while !cancel.is_cancelled() {
            let outcome = self.run_cycle_and_hand_off(sink, cancel).await;
            cycles += 1;

            let pause = if outcome.is_success() {
                Duration::from_secs(self.schedule.interval_secs)
            } else {
                Duration::from_secs(self.schedule.error_backoff_secs)
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        tracing::info!(cycles = cycles, "Stopped continuous ingestion");
        cycles
    }
}
