//! Scopion Client - HTTP and live-stream access to a Scopion server
//!
//! Implements the data-source traits of `scopion-core`:
//!
//! - [`ApiClient`] - request/response calls (`SnapshotSource`, `TraceSource`)
//! - [`LiveChannel`] - Server-Sent Events subscriptions (`LiveSource`)

pub mod error;
pub mod http;
pub mod live;
pub mod sse;

// Re-exports for convenience
pub use error::{ClientError, ClientResult};
pub use http::ApiClient;
pub use live::{LiveChannel, SseSubscription};
pub use sse::{LineTooLong, SseEvent, SseParser};
