//! Error types for scopion-client crate

use scopion_core::{ChannelError, TransportError};
use thiserror::Error;

/// Errors that can occur while building a client
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL does not parse
    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Base URL parses but cannot carry API paths
    #[error("Unsupported server URL: {0}")]
    UnsupportedUrl(String),

    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Result type for client construction
pub type ClientResult<T> = Result<T, ClientError>;

/// Classify a reqwest failure of a request/response call
pub(crate) fn transport_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if let Some(status) = err.status() {
        TransportError::status(status.as_u16(), err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Classify a reqwest failure while opening or reading the live stream
pub(crate) fn channel_error(err: &reqwest::Error) -> ChannelError {
    if err.is_connect() || err.is_timeout() {
        ChannelError::Connect(err.to_string())
    } else {
        ChannelError::Stream(err.to_string())
    }
}
