//! Per-family fetch orchestration
//!
//! Every call goes through the shared [`RateLimiter`], is bounded by the
//! per-call timeout and is retried on retryable failures. Per-item failures are
//! turned into events; only a listing that cannot be fetched at all is fatal.

use crate::{
    config::IngestConfig,
    endpoint::{EndpointPayload, EndpointRequest, MarketDataEndpoint},
    error::{EndpointError, IngestError},
    event_log::EventLog,
    metrics::FamilyMetrics,
    rate_limiter::RateLimiter,
    types::{Component, EntityId, EventRecord, GlobalRecord, ListingRecord, Severity, TickerRecord},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Fetch settings derived from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub page_size: u32,
    pub max_pages: u32,
}

impl From<&IngestConfig> for FetchSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            request_timeout: config.endpoints.request_timeout(),
            page_size: config.pagination.page_size.max(1),
            max_pages: config.pagination.max_pages.max(1),
        }
    }
}

/// A gated call that failed for good
#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub error: EndpointError,
    pub attempts: u32,
}

impl CallFailure {
    fn context(&self, request: EndpointRequest) -> serde_json::Value {
        json!({
            "request": request.to_string(),
            "kind": self.error.kind(),
            "attempts": self.attempts,
        })
    }
}

/// Orchestrates endpoint calls for all three families
pub struct Fetcher {
    endpoint: Arc<dyn MarketDataEndpoint>,
    limiter: Arc<RateLimiter>,
    metrics: FamilyMetrics,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(
        endpoint: Arc<dyn MarketDataEndpoint>,
        limiter: Arc<RateLimiter>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            endpoint,
            limiter,
            metrics: FamilyMetrics::new(),
            settings,
        }
    }

    pub fn metrics(&self) -> &FamilyMetrics {
        &self.metrics
    }

    /// The limiter gating every call of this fetcher
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn settings(&self) -> FetchSettings {
        self.settings
    }

    /// Performs one request with limiter gating, timeout and retries
    ///
    /// `extract` pulls the expected record set out of the payload. A payload
    /// that does not answer `request` counts as a malformed response.
    pub async fn call<T>(
        &self,
        request: EndpointRequest,
        extract: fn(EndpointPayload) -> Option<T>,
    ) -> Result<T, CallFailure> {
        let family = request.family();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.admit().await;

            let start = Instant::now();
            let result = match timeout(self.settings.request_timeout, self.endpoint.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(EndpointError::transport(format!(
                    "request timed out after {:?}",
                    self.settings.request_timeout
                ))),
            };
            let result = result.and_then(|payload| {
                request.check_payload(&payload)?;
                extract(payload).ok_or_else(|| {
                    EndpointError::malformed(format!("unexpected {} payload", family.as_str()))
                })
            });
            self.metrics
                .collector(family)
                .record_request(start.elapsed(), result.is_ok())
                .await;

            match result {
                Ok(payload) => return Ok(payload),
                Err(error) if error.is_retryable() && attempt < self.settings.max_attempts => {
                    tracing::warn!(
                        request = %request,
                        attempt = attempt,
                        max_attempts = self.settings.max_attempts,
                        error = %error,
                        "Endpoint call failed, retrying"
                    );
                    self.limiter.backoff(attempt).await;
                }
                Err(error) => {
                    return Err(CallFailure {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }

    /// Pages through the listing endpoint
    ///
    /// # Arguments
    /// * `known_total` - Active entity count from the last global record, if
    ///   any; pages starting past it are not requested
    /// * `log` - Event log of the current cycle
    ///
    /// # Returns
    /// Listing records in page order, or `ListingUnavailable` when the first
    /// page could not be fetched
    pub async fn fetch_listing(
        &self,
        known_total: Option<u64>,
        log: &mut EventLog,
    ) -> Result<Vec<ListingRecord>, IngestError> {
        let mut records = Vec::new();
        let mut pages = 0u32;
        let mut start = 1u32;

        while pages < self.settings.max_pages {
            if let Some(total) = known_total {
                if pages > 0 && u64::from(start) > total {
                    tracing::debug!(
                        start = start,
                        known_total = total,
                        "Stopped listing at the known entity count"
                    );
                    break;
                }
            }

            let request = EndpointRequest::ListingPage {
                start,
                limit: self.settings.page_size,
            };

            let page = match self.call(request, EndpointPayload::into_listing).await {
                Ok(page) => page,
                Err(failure) => {
                    log.record(
                        EventRecord::new(
                            Severity::Error,
                            Component::Fetcher,
                            format!(
                                "listing page at start={} failed after {} attempt(s): {}",
                                start, failure.attempts, failure.error
                            ),
                        )
                        .with_context(failure.context(request)),
                    );
                    if pages == 0 {
                        return Err(IngestError::ListingUnavailable(failure.error));
                    }
                    break;
                }
            };

            pages += 1;
            if page.dropped > 0 {
                log.record(
                    EventRecord::new(
                        Severity::Error,
                        Component::EndpointClient,
                        format!(
                            "listing page at start={} had {} entries without an identifier",
                            start, page.dropped
                        ),
                    )
                    .with_context(json!({ "start": start, "dropped": page.dropped })),
                );
            }

            let received = page.records.len();
            records.extend(page.records);

            if !page.has_more {
                break;
            }
            start = start.saturating_add(self.settings.page_size);
            tracing::debug!(page = pages, received = received, "Fetched listing page");
        }

        if pages == self.settings.max_pages {
            tracing::debug!(max_pages = pages, "Stopped listing at the page limit");
        }
        log.info(
            Component::Fetcher,
            format!("fetched {} listing entries over {} page(s)", records.len(), pages),
        );
        Ok(records)
    }

    /// Fetches the global record, or records why it could not be fetched
    pub async fn fetch_global(&self, log: &mut EventLog) -> Option<GlobalRecord> {
        let request = EndpointRequest::Global;
        match self.call(request, EndpointPayload::into_global).await {
            Ok(record) => Some(record),
            Err(failure) => {
                log.record(
                    EventRecord::new(
                        Severity::Error,
                        Component::Fetcher,
                        format!(
                            "global fetch failed after {} attempt(s): {}",
                            failure.attempts, failure.error
                        ),
                    )
                    .with_context(failure.context(request)),
                );
                None
            }
        }
    }

    /// Fetches one ticker per id, in order
    ///
    /// Failed entities are absent from the result; each failure is recorded
    /// as an error event referencing the entity.
    pub async fn fetch_tickers(&self, ids: &[EntityId], log: &mut EventLog) -> Vec<TickerRecord> {
        let mut tickers = Vec::with_capacity(ids.len());
        let mut failed = 0usize;

        for &id in ids {
            let request = EndpointRequest::Ticker { id };
            match self.call(request, EndpointPayload::into_ticker).await {
                Ok(record) => tickers.push(record),
                Err(failure) => {
                    failed += 1;
                    log.record(
                        EventRecord::new(
                            Severity::Error,
                            Component::Fetcher,
                            format!(
                                "ticker for entity {} failed after {} attempt(s): {}",
                                id, failure.attempts, failure.error
                            ),
                        )
                        .with_entity(id)
                        .with_context(failure.context(request)),
                    );
                }
            }
        }

        log.info(
            Component::Fetcher,
            format!(
                "fetched {} of {} tickers ({} failed)",
                tickers.len(),
                ids.len(),
                failed
            ),
        );
        tickers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::mock::{global_record, listing_record, ticker_record, MockEndpoint};
    use crate::rate_limiter::BackoffPolicy;
    use crate::types::EndpointFamily;

    fn settings() -> FetchSettings {
        FetchSettings {
            max_attempts: 3,
            request_timeout: Duration::from_secs(5),
            page_size: 2,
            max_pages: 10,
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            10,
            Duration::from_secs(60),
            BackoffPolicy {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(4),
            },
        ))
    }

    fn fetcher(mock: Arc<MockEndpoint>) -> Fetcher {
        Fetcher::new(mock, limiter(), settings())
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_pages_are_concatenated_in_order() {
        let mock = Arc::new(MockEndpoint::new());
        mock.set_page(1, vec![listing_record(1, "A"), listing_record(2, "B")], true);
        mock.set_page(3, vec![listing_record(3, "C"), listing_record(4, "D")], true);
        mock.set_page(5, vec![listing_record(5, "E")], false);

        let mut log = EventLog::new();
        let records = fetcher(mock.clone()).fetch_listing(None, &mut log).await.unwrap();

        let ids: Vec<u64> = records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            mock.calls(),
            vec![
                EndpointRequest::ListingPage { start: 1, limit: 2 },
                EndpointRequest::ListingPage { start: 3, limit: 2 },
                EndpointRequest::ListingPage { start: 5, limit: 2 },
            ]
        );
        assert_eq!(log.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_stops_past_known_entity_count() {
        let mock = Arc::new(MockEndpoint::new());
        for start in [1, 3, 5, 7] {
            mock.set_page(
                start,
                vec![listing_record(start as u64, "X"), listing_record(start as u64 + 1, "Y")],
                true,
            );
        }

        let mut log = EventLog::new();
        let records = fetcher(mock.clone())
            .fetch_listing(Some(4), &mut log)
            .await
            .unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(mock.call_count(EndpointFamily::Listing), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_listing_page_ignores_zero_entity_count() {
        let mock = Arc::new(MockEndpoint::with_listing(vec![listing_record(1, "A")]));

        let mut log = EventLog::new();
        let records = fetcher(mock.clone())
            .fetch_listing(Some(0), &mut log)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(mock.call_count(EndpointFamily::Listing), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_stops_at_max_pages() {
        let mock = Arc::new(MockEndpoint::new());
        for start in [1, 3, 5, 7] {
            mock.set_page(
                start,
                vec![listing_record(start as u64, "X"), listing_record(start as u64 + 1, "Y")],
                true,
            );
        }
        let fetcher = Fetcher::new(
            mock.clone(),
            limiter(),
            FetchSettings {
                max_pages: 2,
                ..settings()
            },
        );

        let mut log = EventLog::new();
        let records = fetcher.fetch_listing(None, &mut log).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(mock.call_count(EndpointFamily::Listing), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_listing_page_failure_is_fatal() {
        let mock = Arc::new(MockEndpoint::new());
        mock.push_page_error(1, EndpointError::malformed("not json"));

        let mut log = EventLog::new();
        let err = fetcher(mock.clone()).fetch_listing(None, &mut log).await.unwrap_err();
        assert!(matches!(err, IngestError::ListingUnavailable(_)));
        assert_eq!(log.error_count(), 1);
        assert_eq!(mock.call_count(EndpointFamily::Listing), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_listing_page_failure_keeps_earlier_pages() {
        let mock = Arc::new(MockEndpoint::new());
        mock.set_page(1, vec![listing_record(1, "A"), listing_record(2, "B")], true);
        mock.push_page_error(3, EndpointError::malformed("truncated"));

        let mut log = EventLog::new();
        let records = fetcher(mock).fetch_listing(None, &mut log).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(log.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_listing_entries_are_reported() {
        let mock = Arc::new(MockEndpoint::with_listing(vec![listing_record(1, "A")]));
        mock.set_page_dropped(1, 2);

        let mut log = EventLog::new();
        let records = fetcher(mock).fetch_listing(None, &mut log).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(log.error_count(), 1);
        assert_eq!(log.events()[0].source(), Component::EndpointClient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_are_retried_with_backoff() {
        let mock = Arc::new(MockEndpoint::new());
        mock.set_global(global_record(1.0e12));
        mock.push_global_error(EndpointError::transport("connection reset"));
        mock.push_global_error(EndpointError::rate_limited("HTTP 429"));

        let start = Instant::now();
        let mut log = EventLog::new();
        let global = fetcher(mock.clone()).fetch_global(&mut log).await;

        assert!(global.is_some());
        assert_eq!(mock.call_count(EndpointFamily::Global), 3);
        // 500ms after the first attempt, 1s after the second
        assert!(Instant::now().duration_since(start) >= Duration::from_millis(1500));
        assert_eq!(log.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_not_retried() {
        let mock = Arc::new(MockEndpoint::new());
        mock.push_ticker_error(EntityId(1), EndpointError::malformed("bad body"));
        mock.set_ticker(ticker_record(1, 10.0));

        let mut log = EventLog::new();
        let tickers = fetcher(mock.clone())
            .fetch_tickers(&[EntityId(1)], &mut log)
            .await;

        assert!(tickers.is_empty());
        assert_eq!(mock.call_count(EndpointFamily::Ticker), 1);
        assert_eq!(log.errors_for(EntityId(1)).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_for_another_entity_is_rejected() {
        let mock = Arc::new(MockEndpoint::new());
        mock.set_ticker(ticker_record(1, 1.0));
        mock.answer_ticker_with(EntityId(2), ticker_record(1, 1.0));

        let mut log = EventLog::new();
        let fetcher = fetcher(mock.clone());
        let tickers = fetcher
            .fetch_tickers(&[EntityId(1), EntityId(2)], &mut log)
            .await;

        let ids: Vec<u64> = tickers.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(log.errors_for(EntityId(2)).count(), 1);
        assert_eq!(log.error_count(), 1);
        // Malformed, so not retried
        assert_eq!(mock.call_count(EndpointFamily::Ticker), 2);

        let metrics = fetcher.metrics().collector(EndpointFamily::Ticker).get_metrics().await;
        assert_eq!(metrics.failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bad_ticker_does_not_abort_the_rest() {
        let mock = Arc::new(MockEndpoint::new());
        mock.set_ticker(ticker_record(1, 1.0));
        mock.fail_ticker_always(EntityId(2), EndpointError::transport("timeout"));
        mock.set_ticker(ticker_record(3, 3.0));

        let mut log = EventLog::new();
        let fetcher = fetcher(mock.clone());
        let tickers = fetcher
            .fetch_tickers(&[EntityId(1), EntityId(2), EntityId(3)], &mut log)
            .await;

        let ids: Vec<u64> = tickers.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        // 1 + 3 attempts + 1
        assert_eq!(mock.call_count(EndpointFamily::Ticker), 5);
        assert_eq!(log.errors_for(EntityId(2)).count(), 1);

        let metrics = fetcher.metrics().collector(EndpointFamily::Ticker).get_metrics().await;
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.failed_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_is_admitted_by_the_limiter() {
        let mock = Arc::new(MockEndpoint::new());
        mock.fail_ticker_always(EntityId(9), EndpointError::transport("down"));
        let limiter = limiter();
        let fetcher = Fetcher::new(mock, limiter.clone(), settings());

        let mut log = EventLog::new();
        fetcher.fetch_tickers(&[EntityId(9)], &mut log).await;
        assert_eq!(limiter.total_admitted().await, 3);
    }

    struct SlowEndpoint;

    #[async_trait::async_trait]
    impl MarketDataEndpoint for SlowEndpoint {
        async fn fetch(&self, _request: EndpointRequest) -> Result<EndpointPayload, EndpointError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(EndpointError::transport("never answered"))
        }

        fn endpoint_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transport_error() {
        let fetcher = Fetcher::new(
            Arc::new(SlowEndpoint),
            limiter(),
            FetchSettings {
                max_attempts: 1,
                ..settings()
            },
        );

        let failure = fetcher
            .call(EndpointRequest::Global, EndpointPayload::into_global)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, EndpointError::Transport(_)));
        assert_eq!(failure.attempts, 1);
    }
}
