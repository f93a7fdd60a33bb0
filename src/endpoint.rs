//! Endpoint abstraction for the provider's market-data API

use crate::{
    error::EndpointError,
    types::{EndpointFamily, EntityId, GlobalRecord, ListingPage, TickerRecord},
};
use async_trait::async_trait;

/// Describes one request against one endpoint family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRequest {
    /// A listing page starting at the 1-based `start` offset
    ListingPage { start: u32, limit: u32 },
    /// The global aggregate
    Global,
    /// The ticker of a single entity
    Ticker { id: EntityId },
}

impl EndpointRequest {
    /// The endpoint family this request targets
    pub fn family(&self) -> EndpointFamily {
        match self {
            EndpointRequest::ListingPage { .. } => EndpointFamily::Listing,
            EndpointRequest::Global => EndpointFamily::Global,
            EndpointRequest::Ticker { .. } => EndpointFamily::Ticker,
        }
    }

    /// Checks that a payload answers this request
    ///
    /// A payload of another family, or a ticker for another entity, is a
    /// malformed response.
    pub fn check_payload(&self, payload: &EndpointPayload) -> Result<(), EndpointError> {
        let received = payload.family();
        if received != self.family() {
            return Err(EndpointError::malformed(format!(
                "expected {} payload, got {}",
                self.family().as_str(),
                received.as_str()
            )));
        }

        match (self, payload) {
            (EndpointRequest::Ticker { id }, EndpointPayload::Ticker(record)) if record.id != *id => {
                Err(EndpointError::malformed(format!(
                    "requested ticker for entity {}, got entity {}",
                    id, record.id
                )))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for EndpointRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointRequest::ListingPage { start, limit } => {
                write!(f, "listing(start={}, limit={})", start, limit)
            }
            EndpointRequest::Global => write!(f, "global"),
            EndpointRequest::Ticker { id } => write!(f, "ticker({})", id),
        }
    }
}

/// Structured records parsed from one response
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointPayload {
    Listing(ListingPage),
    Global(GlobalRecord),
    Ticker(TickerRecord),
}

impl EndpointPayload {
    /// The endpoint family this payload came from
    pub fn family(&self) -> EndpointFamily {
        match self {
            EndpointPayload::Listing(_) => EndpointFamily::Listing,
            EndpointPayload::Global(_) => EndpointFamily::Global,
            EndpointPayload::Ticker(_) => EndpointFamily::Ticker,
        }
    }

    pub fn into_listing(self) -> Option<ListingPage> {
        match self {
            EndpointPayload::Listing(page) => Some(page),
            _ => None,
        }
    }

    pub fn into_global(self) -> Option<GlobalRecord> {
        match self {
            EndpointPayload::Global(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_ticker(self) -> Option<TickerRecord> {
        match self {
            EndpointPayload::Ticker(record) => Some(record),
            _ => None,
        }
    }
}

/// Trait for market-data endpoints
///
/// One call is one request on the wire. Implementations normalize the
/// response and classify failures; they never retry or rate limit, which is
/// the fetcher's job.
#[async_trait]
pub trait MarketDataEndpoint: Send + Sync {
    /// Performs a single request
    ///
    /// # Arguments
    /// * `request` - Which endpoint to call and with which parameters
    ///
    /// # Returns
    /// The payload matching the request's family, or a classified error
    async fn fetch(&self, request: EndpointRequest) -> Result<EndpointPayload, EndpointError>;

    /// Returns the name of this endpoint implementation
    fn endpoint_name(&self) -> &'static str;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::types::ListingRecord;
    use chrono::Utc;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted endpoint for testing
    ///
    /// Listing pages are served by `start` offset, tickers by id. A queued
    /// error is returned once per call before falling back to the scripted
    /// success (if any), so "fail twice then succeed" is easy to express.
    #[derive(Default)]
    pub struct MockEndpoint {
        pages: Mutex<HashMap<u32, ListingPage>>,
        page_errors: Mutex<HashMap<u32, VecDeque<EndpointError>>>,
        global: Mutex<Option<GlobalRecord>>,
        global_errors: Mutex<VecDeque<EndpointError>>,
        tickers: Mutex<HashMap<EntityId, TickerRecord>>,
        ticker_errors: Mutex<HashMap<EntityId, VecDeque<EndpointError>>>,
        ticker_always_fails: Mutex<HashMap<EntityId, EndpointError>>,
        calls: Mutex<Vec<EndpointRequest>>,
    }

    pub fn listing_record(id: u64, symbol: &str) -> ListingRecord {
        ListingRecord {
            id: EntityId(id),
            symbol: symbol.to_string(),
            name: format!("{} coin", symbol),
            rank: Some(id as u32),
            website_slug: Some(symbol.to_lowercase()),
            as_of: Utc::now(),
        }
    }

    pub fn ticker_record(id: u64, price_usd: f64) -> TickerRecord {
        TickerRecord {
            id: EntityId(id),
            price_usd: Some(price_usd),
            volume_24h_usd: Some(price_usd * 1000.0),
            market_cap_usd: Some(price_usd * 1_000_000.0),
            percent_change_1h: Some(0.1),
            percent_change_24h: Some(-1.5),
            percent_change_7d: Some(4.0),
            as_of: Utc::now(),
        }
    }

    pub fn global_record(total_market_cap_usd: f64) -> GlobalRecord {
        GlobalRecord {
            total_market_cap_usd,
            total_volume_24h_usd: total_market_cap_usd / 20.0,
            active_cryptocurrencies: 1500,
            active_markets: Some(9000),
            bitcoin_dominance_pct: Some(52.3),
            as_of: Utc::now(),
        }
    }

    impl MockEndpoint {
        pub fn new() -> Self {
            Self::default()
        }

        /// Serves the given records as a single final page at `start=1`
        pub fn with_listing(records: Vec<ListingRecord>) -> Self {
            let mock = Self::new();
            mock.set_page(1, records, false);
            mock
        }

        pub fn set_page(&self, start: u32, records: Vec<ListingRecord>, has_more: bool) {
            self.pages.lock().unwrap().insert(
                start,
                ListingPage {
                    records,
                    dropped: 0,
                    has_more,
                },
            );
        }

        pub fn set_page_dropped(&self, start: u32, dropped: usize) {
            if let Some(page) = self.pages.lock().unwrap().get_mut(&start) {
                page.dropped = dropped;
            }
        }

        pub fn push_page_error(&self, start: u32, error: EndpointError) {
            self.page_errors
                .lock()
                .unwrap()
                .entry(start)
                .or_default()
                .push_back(error);
        }

        pub fn set_global(&self, record: GlobalRecord) {
            *self.global.lock().unwrap() = Some(record);
        }

        pub fn push_global_error(&self, error: EndpointError) {
            self.global_errors.lock().unwrap().push_back(error);
        }

        pub fn set_ticker(&self, record: TickerRecord) {
            self.tickers.lock().unwrap().insert(record.id, record);
        }

        /// Answers ticker requests for `id` with `record`, whatever its id
        pub fn answer_ticker_with(&self, id: EntityId, record: TickerRecord) {
            self.tickers.lock().unwrap().insert(id, record);
        }

        pub fn push_ticker_error(&self, id: EntityId, error: EndpointError) {
            self.ticker_errors
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .push_back(error);
        }

        pub fn fail_ticker_always(&self, id: EntityId, error: EndpointError) {
            self.ticker_always_fails.lock().unwrap().insert(id, error);
        }

        pub fn calls(&self) -> Vec<EndpointRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, family: EndpointFamily) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|request| request.family() == family)
                .count()
        }
    }

    #[async_trait]
    impl MarketDataEndpoint for MockEndpoint {
        async fn fetch(&self, request: EndpointRequest) -> Result<EndpointPayload, EndpointError> {
            self.calls.lock().unwrap().push(request);
            match request {
                EndpointRequest::ListingPage { start, .. } => {
                    if let Some(err) = self
                        .page_errors
                        .lock()
                        .unwrap()
                        .get_mut(&start)
                        .and_then(|queue| queue.pop_front())
                    {
                        return Err(err);
                    }
                    let page = self.pages.lock().unwrap().get(&start).cloned();
                    Ok(EndpointPayload::Listing(page.unwrap_or(ListingPage {
                        records: Vec::new(),
                        dropped: 0,
                        has_more: false,
                    })))
                }
                EndpointRequest::Global => {
                    if let Some(err) = self.global_errors.lock().unwrap().pop_front() {
                        return Err(err);
                    }
                    self.global
                        .lock()
                        .unwrap()
                        .clone()
                        .map(EndpointPayload::Global)
                        .ok_or_else(|| EndpointError::malformed("no global record scripted"))
                }
                EndpointRequest::Ticker { id } => {
                    if let Some(err) = self.ticker_always_fails.lock().unwrap().get(&id) {
                        return Err(err.clone());
                    }
                    if let Some(err) = self
                        .ticker_errors
                        .lock()
                        .unwrap()
                        .get_mut(&id)
                        .and_then(|queue| queue.pop_front())
                    {
                        return Err(err);
                    }
                    self.tickers
                        .lock()
                        .unwrap()
                        .get(&id)
                        .cloned()
                        .map(EndpointPayload::Ticker)
                        .ok_or_else(|| EndpointError::malformed(format!("no ticker for {}", id)))
                }
            }
        }

        fn endpoint_name(&self) -> &'static str {
            "mock"
        }
    }
}
