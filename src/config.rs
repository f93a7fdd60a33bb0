//! Runtime configuration for the ingestion pipeline
//!
//! The configuration document is YAML. Only the `endpoints` section is
//! required; every other section falls back to the defaults in `constants`.
//!
//! ```yaml
//! rate:
//!   max_requests_per_window: 15
//!   window_duration: 60        # seconds
//! global:
//!   refresh_every_n_cycles: 4
//! retry:
//!   max_attempts: 3
//! endpoints:
//!   listing_url: https://api.coinmarketcap.com/v2/listings/
//!   global_url: https://api.coinmarketcap.com/v2/global/
//!   ticker_url_template: https://api.coinmarketcap.com/v2/ticker/{id}/
//! pagination:
//!   max_pages: 20
//! ```

use crate::{
    constants::{
        DEFAULT_CYCLE_INTERVAL_SECS, DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_GLOBAL_REFRESH_CYCLES,
        DEFAULT_MAX_PAGES, DEFAULT_MAX_REQUESTS_PER_WINDOW, DEFAULT_PAGE_SIZE,
        DEFAULT_PROVIDER_HARD_LIMIT, DEFAULT_WINDOW_SECS, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
        MAX_RETRY_ATTEMPTS, REQUEST_TIMEOUT_SECS, TICKER_ID_PLACEHOLDER,
    },
    error::IngestError,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Local request-rate target
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    pub max_requests_per_window: u32,
    /// Window length in seconds
    #[serde(rename = "window_duration")]
    pub window_duration_secs: u64,
    /// Published provider cap for the same window
    #[serde(default = "default_hard_limit")]
    pub provider_hard_limit: u32,
}

/// Cadence of the global endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    pub refresh_every_n_cycles: u32,
}

/// Retry policy for gated calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Provider endpoint locations
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    pub listing_url: String,
    pub global_url: String,
    /// Ticker URL with an `{id}` placeholder
    pub ticker_url_template: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Listing pagination bounds
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    pub max_pages: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Pauses used when the controller runs continuously
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

fn default_hard_limit() -> u32 {
    DEFAULT_PROVIDER_HARD_LIMIT
}
fn default_initial_backoff_ms() -> u64 {
    INITIAL_BACKOFF_MS
}
fn default_max_backoff_ms() -> u64 {
    MAX_BACKOFF_MS
}
fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_error_backoff_secs() -> u64 {
    DEFAULT_ERROR_BACKOFF_SECS
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            window_duration_secs: DEFAULT_WINDOW_SECS,
            provider_hard_limit: DEFAULT_PROVIDER_HARD_LIMIT,
        }
    }
}

impl RateConfig {
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_duration_secs)
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            refresh_every_n_cycles: DEFAULT_GLOBAL_REFRESH_CYCLES,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl EndpointsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
            error_backoff_secs: DEFAULT_ERROR_BACKOFF_SECS,
        }
    }
}

impl IngestConfig {
    /// Builds a configuration with default sections around the given endpoints
    pub fn with_endpoints(endpoints: EndpointsConfig) -> Self {
        Self {
            rate: RateConfig::default(),
            global: GlobalConfig::default(),
            retry: RetryConfig::default(),
            endpoints,
            pagination: PaginationConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }

    /// Parses and validates a YAML configuration document
    pub fn from_yaml_str(document: &str) -> Result<Self, IngestError> {
        let config: Self = serde_yaml::from_str(document)
            .map_err(|e| IngestError::configuration(format!("invalid document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            IngestError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&document)
    }

    /// Checks every option for a usable value
    pub fn validate(&self) -> Result<(), IngestError> {
        let rate = &self.rate;
        if rate.max_requests_per_window == 0 {
            return Err(IngestError::configuration(
                "rate.max_requests_per_window must be at least 1",
            ));
        }
        if rate.window_duration_secs == 0 {
            return Err(IngestError::configuration(
                "rate.window_duration must be at least 1 second",
            ));
        }
        if rate.max_requests_per_window >= rate.provider_hard_limit {
            return Err(IngestError::configuration(format!(
                "rate.max_requests_per_window ({}) must stay below the provider hard limit ({})",
                rate.max_requests_per_window, rate.provider_hard_limit
            )));
        }
        if u64::from(rate.max_requests_per_window) * 2 > u64::from(rate.provider_hard_limit) {
            tracing::warn!(
                max_requests_per_window = rate.max_requests_per_window,
                provider_hard_limit = rate.provider_hard_limit,
                "Request rate target is above half of the provider hard limit"
            );
        }

        if self.global.refresh_every_n_cycles == 0 {
            return Err(IngestError::configuration(
                "global.refresh_every_n_cycles must be at least 1",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(IngestError::configuration(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(IngestError::configuration(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }

        let endpoints = &self.endpoints;
        validate_url("endpoints.listing_url", &endpoints.listing_url)?;
        validate_url("endpoints.global_url", &endpoints.global_url)?;
        if !endpoints.ticker_url_template.contains(TICKER_ID_PLACEHOLDER) {
            return Err(IngestError::configuration(format!(
                "endpoints.ticker_url_template must contain {}",
                TICKER_ID_PLACEHOLDER
            )));
        }
        validate_url(
            "endpoints.ticker_url_template",
            &endpoints
                .ticker_url_template
                .replace(TICKER_ID_PLACEHOLDER, "1"),
        )?;
        if endpoints.request_timeout_secs == 0 {
            return Err(IngestError::configuration(
                "endpoints.request_timeout_secs must be at least 1",
            ));
        }

        if self.pagination.max_pages == 0 || self.pagination.page_size == 0 {
            return Err(IngestError::configuration(
                "pagination.max_pages and pagination.page_size must be at least 1",
            ));
        }

        Ok(())
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), IngestError> {
    reqwest::Url::parse(value)
        .map(|_| ())
        .map_err(|e| IngestError::configuration(format!("{} is not a valid URL: {}", key, e)))
}

#[cfg(test)]
pub(crate) fn test_config() -> IngestConfig {
    IngestConfig::with_endpoints(EndpointsConfig {
        listing_url: "http://localhost/v2/listings/".to_string(),
        global_url: "http://localhost/v2/global/".to_string(),
        ticker_url_template: "http://localhost/v2/ticker/{id}/".to_string(),
        request_timeout_secs: REQUEST_TIMEOUT_SECS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
rate:
  max_requests_per_window: 12
  window_duration: 60
global:
  refresh_every_n_cycles: 4
retry:
  max_attempts: 5
endpoints:
  listing_url: https://api.coinmarketcap.com/v2/listings/
  global_url: https://api.coinmarketcap.com/v2/global/
  ticker_url_template: https://api.coinmarketcap.com/v2/ticker/{id}/
pagination:
  max_pages: 3
"#;

    #[test]
    fn test_parse_full_document() {
        let config = IngestConfig::from_yaml_str(FULL).unwrap();
        assert_eq!(config.rate.max_requests_per_window, 12);
        assert_eq!(config.rate.window_duration(), Duration::from_secs(60));
        assert_eq!(config.rate.provider_hard_limit, DEFAULT_PROVIDER_HARD_LIMIT);
        assert_eq!(config.global.refresh_every_n_cycles, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, INITIAL_BACKOFF_MS);
        assert_eq!(config.pagination.max_pages, 3);
        assert_eq!(config.pagination.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.schedule.interval_secs, DEFAULT_CYCLE_INTERVAL_SECS);
    }

    #[test]
    fn test_missing_endpoints_is_configuration_error() {
        let err = IngestConfig::from_yaml_str("rate:\n  max_requests_per_window: 10\n  window_duration: 60\n")
            .unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
    }

    #[test]
    fn test_rate_at_hard_limit_is_rejected() {
        let mut config = test_config();
        config.rate.max_requests_per_window = config.rate.provider_hard_limit;
        assert!(matches!(
            config.validate(),
            Err(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn test_ticker_template_requires_placeholder() {
        let mut config = test_config();
        config.endpoints.ticker_url_template = "http://localhost/v2/ticker/".to_string();
        assert!(matches!(
            config.validate(),
            Err(IngestError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_cadence_is_rejected() {
        let mut config = test_config();
        config.global.refresh_every_n_cycles = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(test_config().validate().is_ok());
    }
}
