//! Error taxonomy shared by the feed, the query client and the live channel
//!
//! None of these errors is fatal. Fetch and channel failures are reported to
//! callers as state (see [`crate::feed::FeedView`]) so a dashboard can keep
//! showing stale data.

use thiserror::Error;

/// Longest payload excerpt kept inside a [`MalformedPayloadError`]
const PAYLOAD_EXCERPT_LEN: usize = 256;

/// Request/response failure talking to the ingestion API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, ...
    #[error("Network error: {0}")]
    Network(String),

    /// Request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a non-success status
    #[error("Server error: {status} - {message}")]
    Status { status: u16, message: String },
}

impl TransportError {
    /// Create a status error from code and message
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        TransportError::Status {
            status,
            message: message.into(),
        }
    }

    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Failure of the live push channel
///
/// Reported once per subscription; the subscription yields nothing after it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Could not establish the stream
    #[error("Failed to connect live channel: {0}")]
    Connect(String),

    /// Server refused the stream
    #[error("Live channel rejected with status {0}")]
    Status(u16),

    /// Stream broke mid-flight
    #[error("Live channel stream error: {0}")]
    Stream(String),

    /// Server closed the stream
    #[error("Live channel ended")]
    Ended,
}

/// A response body or push message that is not a valid payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed payload: {reason}")]
pub struct MalformedPayloadError {
    /// Decoder message
    pub reason: String,

    /// Leading part of the offending payload, for logs
    pub excerpt: String,
}

impl MalformedPayloadError {
    pub fn new(reason: impl Into<String>, payload: &str) -> Self {
        let excerpt = match payload.char_indices().nth(PAYLOAD_EXCERPT_LEN) {
            Some((idx, _)) => format!("{}...", &payload[..idx]),
            None => payload.to_string(),
        };
        Self {
            reason: reason.into(),
            excerpt,
        }
    }

    /// Build from a serde_json failure on `payload`
    pub fn from_json(err: &serde_json::Error, payload: &str) -> Self {
        Self::new(err.to_string(), payload)
    }
}

/// Error of any request/response read against the API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Malformed(#[from] MalformedPayloadError),
}

impl QueryError {
    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Transport(e) => e.is_retryable(),
            QueryError::Malformed(_) => false,
        }
    }
}

/// Result type for API reads
pub type QueryResult<T> = Result<T, QueryError>;
