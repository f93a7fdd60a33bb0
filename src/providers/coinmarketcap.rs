//! CoinMarketCap public API endpoint implementation

use crate::{
    config::EndpointsConfig,
    constants::{TICKER_ID_PLACEHOLDER, USER_AGENT},
    endpoint::{EndpointPayload, EndpointRequest, MarketDataEndpoint},
    error::EndpointError,
    types::{EntityId, GlobalRecord, ListingPage, ListingRecord, TickerRecord},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;

/// Common response envelope: `data` is null when `metadata.error` is set
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    timestamp: Option<i64>,
    error: Option<String>,
}

/// Listing entry; every field is optional so one bad entry does not sink the page
#[derive(Debug, Deserialize)]
struct RawListingEntry {
    id: Option<u64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    website_slug: Option<String>,
    #[serde(default)]
    rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTicker {
    id: u64,
    #[serde(default)]
    quotes: HashMap<String, RawTickerQuote>,
    last_updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTickerQuote {
    price: Option<f64>,
    volume_24h: Option<f64>,
    market_cap: Option<f64>,
    percent_change_1h: Option<f64>,
    percent_change_24h: Option<f64>,
    percent_change_7d: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawGlobal {
    active_cryptocurrencies: u64,
    active_markets: Option<u64>,
    bitcoin_percentage_of_market_cap: Option<f64>,
    quotes: HashMap<String, RawGlobalQuote>,
    last_updated: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawGlobalQuote {
    total_market_cap: f64,
    total_volume_24h: f64,
}

/// Quote currency requested from the provider
const QUOTE_CURRENCY: &str = "USD";

/// CoinMarketCap endpoint
pub struct CoinMarketCapClient {
    client: Client,
    listing_url: Url,
    global_url: Url,
    ticker_url_template: String,
}

impl CoinMarketCapClient {
    /// Creates a new client for the configured endpoints
    pub fn new(endpoints: &EndpointsConfig) -> Result<Self, EndpointError> {
        let client = Client::builder()
            .timeout(endpoints.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            listing_url: parse_url(&endpoints.listing_url)?,
            global_url: parse_url(&endpoints.global_url)?,
            ticker_url_template: endpoints.ticker_url_template.clone(),
        })
    }

    /// Builds the URL of one listing page
    fn listing_page_url(&self, start: u32, limit: u32) -> Url {
        let mut url = self.listing_url.clone();
        url.query_pairs_mut()
            .append_pair("start", &start.to_string())
            .append_pair("limit", &limit.to_string())
            .append_pair("sort", "id")
            .append_pair("structure", "array");
        url
    }

    /// Builds the ticker URL of one entity
    fn ticker_url(&self, id: EntityId) -> Result<Url, EndpointError> {
        parse_url(
            &self
                .ticker_url_template
                .replace(TICKER_ID_PLACEHOLDER, &id.to_string()),
        )
    }

    /// Sends a GET and returns the body of a successful response
    async fn get_body(&self, url: Url) -> Result<String, EndpointError> {
        tracing::debug!(url = %url, "Requesting provider endpoint");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        classify_status(status, &body)?;
        Ok(body)
    }
}

/// Maps a non-success HTTP status to the matching endpoint error
///
/// 429 is the provider's quota signal and 5xx a transient server fault; any
/// other non-2xx status will not improve on retry.
fn classify_status(status: StatusCode, body: &str) -> Result<(), EndpointError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Err(EndpointError::rate_limited(format!("HTTP {}", status)))
    } else if status.is_server_error() {
        Err(EndpointError::transport(format!("HTTP {}", status)))
    } else {
        Err(EndpointError::malformed(format!(
            "HTTP {}: {}",
            status,
            truncate(body)
        )))
    }
}

#[async_trait]
impl MarketDataEndpoint for CoinMarketCapClient {
    async fn fetch(&self, request: EndpointRequest) -> Result<EndpointPayload, EndpointError> {
        match request {
            EndpointRequest::ListingPage { start, limit } => {
                let body = self.get_body(self.listing_page_url(start, limit)).await?;
                parse_listing_page(&body, limit).map(EndpointPayload::Listing)
            }
            EndpointRequest::Global => {
                let body = self.get_body(self.global_url.clone()).await?;
                parse_global(&body).map(EndpointPayload::Global)
            }
            EndpointRequest::Ticker { id } => {
                let body = self.get_body(self.ticker_url(id)?).await?;
                parse_ticker(&body).map(EndpointPayload::Ticker)
            }
        }
    }

    fn endpoint_name(&self) -> &'static str {
        "coinmarketcap"
    }
}

fn parse_url(value: &str) -> Result<Url, EndpointError> {
    Url::parse(value).map_err(|e| EndpointError::malformed(format!("invalid URL {}: {}", value, e)))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn timestamp_or_now(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

/// Unwraps the envelope, classifying a provider-reported error
fn open_envelope<T: serde::de::DeserializeOwned>(
    body: &str,
    what: &str,
) -> Result<(T, Metadata), EndpointError> {
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| {
        EndpointError::malformed(format!(
            "failed to parse {} response: {}. Response: {}",
            what,
            e,
            truncate(body)
        ))
    })?;

    match envelope.data {
        Some(data) => Ok((data, envelope.metadata)),
        None => {
            let message = envelope
                .metadata
                .error
                .unwrap_or_else(|| format!("{} response carried no data", what));
            let lowered = message.to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("too many requests") {
                Err(EndpointError::rate_limited(message))
            } else {
                Err(EndpointError::malformed(message))
            }
        }
    }
}

/// Parses one listing page; entries without an id are counted, not returned
pub(crate) fn parse_listing_page(body: &str, limit: u32) -> Result<ListingPage, EndpointError> {
    let (entries, metadata): (Vec<RawListingEntry>, _) = open_envelope(body, "listing")?;
    let as_of = timestamp_or_now(metadata.timestamp);
    let raw_count = entries.len();

    let mut records = Vec::with_capacity(raw_count);
    let mut dropped = 0;
    for entry in entries {
        match entry.id {
            Some(id) => records.push(ListingRecord {
                id: EntityId(id),
                symbol: entry.symbol.unwrap_or_default(),
                name: entry.name.unwrap_or_default(),
                rank: entry.rank,
                website_slug: entry.website_slug,
                as_of,
            }),
            None => dropped += 1,
        }
    }

    Ok(ListingPage {
        records,
        dropped,
        has_more: raw_count as u64 >= u64::from(limit) && raw_count > 0,
    })
}

/// Parses a ticker response
pub(crate) fn parse_ticker(body: &str) -> Result<TickerRecord, EndpointError> {
    let (raw, metadata): (RawTicker, _) = open_envelope(body, "ticker")?;
    let quote = raw.quotes.get(QUOTE_CURRENCY).ok_or_else(|| {
        EndpointError::malformed(format!(
            "ticker {} has no {} quote",
            raw.id, QUOTE_CURRENCY
        ))
    })?;

    Ok(TickerRecord {
        id: EntityId(raw.id),
        price_usd: quote.price,
        volume_24h_usd: quote.volume_24h,
        market_cap_usd: quote.market_cap,
        percent_change_1h: quote.percent_change_1h,
        percent_change_24h: quote.percent_change_24h,
        percent_change_7d: quote.percent_change_7d,
        as_of: timestamp_or_now(raw.last_updated.or(metadata.timestamp)),
    })
}

/// Parses the global response
pub(crate) fn parse_global(body: &str) -> Result<GlobalRecord, EndpointError> {
    let (raw, metadata): (RawGlobal, _) = open_envelope(body, "global")?;
    let quote = raw.quotes.get(QUOTE_CURRENCY).ok_or_else(|| {
        EndpointError::malformed(format!("global data has no {} quote", QUOTE_CURRENCY))
    })?;

    Ok(GlobalRecord {
        total_market_cap_usd: quote.total_market_cap,
        total_volume_24h_usd: quote.total_volume_24h,
        active_cryptocurrencies: raw.active_cryptocurrencies,
        active_markets: raw.active_markets,
        bitcoin_dominance_pct: raw.bitcoin_percentage_of_market_cap,
        as_of: timestamp_or_now(raw.last_updated.or(metadata.timestamp)),
    })
}
