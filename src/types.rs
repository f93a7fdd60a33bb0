//! Types for the ingestion pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider identifier of a tracked asset; the join key of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three logically distinct endpoint families of the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFamily {
    /// Paged listing of all tracked entities
    Listing,
    /// Singleton aggregate market state
    Global,
    /// Per-entity ticker
    Ticker,
}

impl EndpointFamily {
    /// Get the family name
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointFamily::Listing => "listing",
            EndpointFamily::Global => "global",
            EndpointFamily::Ticker => "ticker",
        }
    }

    /// Get all endpoint families
    pub fn all() -> &'static [EndpointFamily] {
        &[
            EndpointFamily::Listing,
            EndpointFamily::Global,
            EndpointFamily::Ticker,
        ]
    }
}

/// One entity as returned by the listing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: EntityId,
    pub symbol: String,
    pub name: String,
    /// Market-cap rank, when the listing carries it
    pub rank: Option<u32>,
    pub website_slug: Option<String>,
    pub as_of: DateTime<Utc>,
}

/// One page of the listing endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    /// Records with a usable identifier, in provider order
    pub records: Vec<ListingRecord>,
    /// Raw entries discarded because they carried no identifier
    pub dropped: usize,
    /// Whether the provider may have another page after this one
    pub has_more: bool,
}

/// Market data for one entity from the ticker endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub id: EntityId,
    pub price_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub percent_change_1h: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub percent_change_7d: Option<f64>,
    pub as_of: DateTime<Utc>,
}

/// Aggregate market state from the global endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRecord {
    pub total_market_cap_usd: f64,
    pub total_volume_24h_usd: f64,
    pub active_cryptocurrencies: u64,
    pub active_markets: Option<u64>,
    pub bitcoin_dominance_pct: Option<f64>,
    pub as_of: DateTime<Utc>,
}

/// One row of the joined snapshot
///
/// Ticker and global columns are optional so that an entity without a ticker,
/// or a cycle without any global record, is represented explicitly instead of
/// by a missing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub id: EntityId,
    pub symbol: String,
    pub name: String,
    pub rank: Option<u32>,
    pub website_slug: Option<String>,
    pub listing_as_of: DateTime<Utc>,

    pub price_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub percent_change_1h: Option<f64>,
    pub percent_change_24h: Option<f64>,
    pub percent_change_7d: Option<f64>,
    pub ticker_as_of: Option<DateTime<Utc>>,

    pub global_total_market_cap_usd: Option<f64>,
    pub global_total_volume_24h_usd: Option<f64>,
    pub global_active_cryptocurrencies: Option<u64>,
    pub global_active_markets: Option<u64>,
    pub global_bitcoin_dominance_pct: Option<f64>,
    pub global_as_of: Option<DateTime<Utc>>,
}

impl JoinedRow {
    /// Seeds a row from a listing record with every other column absent
    pub fn from_listing(listing: &ListingRecord) -> Self {
        Self {
            id: listing.id,
            symbol: listing.symbol.clone(),
            name: listing.name.clone(),
            rank: listing.rank,
            website_slug: listing.website_slug.clone(),
            listing_as_of: listing.as_of,
            price_usd: None,
            volume_24h_usd: None,
            market_cap_usd: None,
            percent_change_1h: None,
            percent_change_24h: None,
            percent_change_7d: None,
            ticker_as_of: None,
            global_total_market_cap_usd: None,
            global_total_volume_24h_usd: None,
            global_active_cryptocurrencies: None,
            global_active_markets: None,
            global_bitcoin_dominance_pct: None,
            global_as_of: None,
        }
    }

    /// Copies the ticker columns onto this row
    pub fn apply_ticker(&mut self, ticker: &TickerRecord) {
        self.price_usd = ticker.price_usd;
        self.volume_24h_usd = ticker.volume_24h_usd;
        self.market_cap_usd = ticker.market_cap_usd;
        self.percent_change_1h = ticker.percent_change_1h;
        self.percent_change_24h = ticker.percent_change_24h;
        self.percent_change_7d = ticker.percent_change_7d;
        self.ticker_as_of = Some(ticker.as_of);
    }

    /// Copies the global columns onto this row
    pub fn apply_global(&mut self, global: &GlobalRecord) {
        self.global_total_market_cap_usd = Some(global.total_market_cap_usd);
        self.global_total_volume_24h_usd = Some(global.total_volume_24h_usd);
        self.global_active_cryptocurrencies = Some(global.active_cryptocurrencies);
        self.global_active_markets = global.active_markets;
        self.global_bitcoin_dominance_pct = global.bitcoin_dominance_pct;
        self.global_as_of = Some(global.as_of);
    }

    /// True when a ticker record was merged into this row
    pub fn has_ticker(&self) -> bool {
        self.ticker_as_of.is_some()
    }

    /// True when global columns were broadcast onto this row
    pub fn has_global(&self) -> bool {
        self.global_as_of.is_some()
    }
}

/// The output of one successful cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedSnapshot {
    /// Sequence number of the cycle that produced this snapshot (1-based)
    pub cycle: u64,
    pub created_at: DateTime<Utc>,
    /// Whether the global columns come from a fetch made in this cycle
    pub global_refreshed: bool,
    /// One row per listed entity, in listing order
    pub rows: Vec<JoinedRow>,
}

impl JoinedSnapshot {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the snapshot has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up the row for an entity
    pub fn row(&self, id: EntityId) -> Option<&JoinedRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    /// Rows that have no ticker data
    pub fn rows_missing_ticker(&self) -> impl Iterator<Item = &JoinedRow> {
        self.rows.iter().filter(|row| !row.has_ticker())
    }
}

/// Severity of an event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

/// Pipeline component an event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    RateLimiter,
    EndpointClient,
    Fetcher,
    Joiner,
    CycleController,
}

impl Component {
    /// Get the component name
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::RateLimiter => "rate_limiter",
            Component::EndpointClient => "endpoint_client",
            Component::Fetcher => "fetcher",
            Component::Joiner => "joiner",
            Component::CycleController => "cycle_controller",
        }
    }
}

/// One operational event or error
///
/// Fields are private so a record cannot change after it has been appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    id: Uuid,
    timestamp: DateTime<Utc>,
    severity: Severity,
    source: Component,
    message: String,
    entity: Option<EntityId>,
    context: Option<serde_json::Value>,
}

impl EventRecord {
    /// Create a new event stamped with the current time
    pub fn new(severity: Severity, source: Component, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            source,
            message: message.into(),
            entity: None,
            context: None,
        }
    }

    /// Attach the entity this event concerns
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attach raw context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn source(&self) -> Component {
        self.source
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn context(&self) -> Option<&serde_json::Value> {
        self.context.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Info => "INFO",
            Severity::Error => "ERROR",
        };
        write!(f, "[{}] {}: {}", level, self.source.as_str(), self.message)?;
        if let Some(entity) = self.entity {
            write!(f, " (entity {})", entity)?;
        }
        Ok(())
    }
}
