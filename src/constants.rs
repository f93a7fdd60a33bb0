//! Constants for the ingestion pipeline
//!
//! Compile-time defaults for every optional configuration key. The runtime
//! configuration document (see `config`) overrides any of these.

/// Requests admitted per rate window by default
///
/// The public API allows 30 requests per minute; the default target is half
/// of that so clock jitter never pushes us over the hard cap.
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: u32 = 15;

/// Length of the sliding rate window (in seconds)
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// The provider's published hard limit per window
pub const DEFAULT_PROVIDER_HARD_LIMIT: u32 = 30;

/// Refresh the global record every N cycles
pub const DEFAULT_GLOBAL_REFRESH_CYCLES: u32 = 1;

/// HTTP request timeout (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Maximum number of attempts for a single gated call
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff delay for retries (in milliseconds)
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay for retries (in milliseconds)
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Entries requested per listing page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on listing pages requested per cycle
pub const DEFAULT_MAX_PAGES: u32 = 20;

/// Pause between cycles when running continuously (in seconds)
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 300;

/// Pause after a failed cycle when running continuously (in seconds)
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;

/// Placeholder substituted with the entity id in the ticker URL template
pub const TICKER_ID_PLACEHOLDER: &str = "{id}";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "crypto-ingest-sdk/0.1.0";
