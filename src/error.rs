//! Error types for the ingestion pipeline

use crate::types::EntityId;
use thiserror::Error;

/// Errors that can occur when calling a single provider endpoint
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EndpointError {
    /// Network failure, timeout or transient server error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider reported its quota as exceeded
    #[error("Rate limited by server: {0}")]
    RateLimitedByServer(String),

    /// Response arrived but could not be parsed into the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl EndpointError {
    /// Creates a Transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a RateLimitedByServer error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimitedByServer(msg.into())
    }

    /// Creates a MalformedResponse error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// True when the same request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimitedByServer(_))
    }

    /// Short machine-readable kind, used in event context
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::RateLimitedByServer(_) => "rate_limited_by_server",
            Self::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors that abort an ingestion cycle
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestError {
    /// Join key uniqueness was violated
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// A required option is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not a single listing page could be fetched
    #[error("Listing unavailable: {0}")]
    ListingUnavailable(#[source] EndpointError),

    /// The cycle was cancelled externally
    #[error("Cycle cancelled")]
    Cancelled,
}

impl IngestError {
    /// Creates a DataIntegrity error for a repeated entity id
    pub fn duplicate_entity(id: EntityId) -> Self {
        Self::DataIntegrity(format!("duplicate entity id {} in listing", id))
    }

    /// Creates a Configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Errors raised by the persistence collaborator
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink rejected or failed to store the hand-off
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(EndpointError::transport("reset").is_retryable());
        assert!(EndpointError::rate_limited("429").is_retryable());
        assert!(!EndpointError::malformed("bad json").is_retryable());
    }

    #[test]
    fn test_duplicate_entity_message() {
        let err = IngestError::duplicate_entity(EntityId(42));
        assert_eq!(
            err.to_string(),
            "Data integrity error: duplicate entity id 42 in listing"
        );
    }
}
