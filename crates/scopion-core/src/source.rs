//! Seams between the core and its data sources
//!
//! The feed aggregator and the trace loader only see these traits; the HTTP
//! and SSE implementations live in `scopion-client`.

use crate::error::{ChannelError, QueryResult};
use crate::events::Event;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Point-in-time fetch of the most recent events
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Most recent `limit` events, newest first
    async fn fetch_recent(&self, limit: usize) -> QueryResult<Vec<Event>>;
}

/// Historical query of the events belonging to one trace
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn trace_events(&self, trace_id: &str) -> QueryResult<Vec<Event>>;
}

/// Opens live push subscriptions
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn LiveSubscription>, ChannelError>;
}

/// A single-consumer, non-restartable stream of pushed events
///
/// Yields `Some(Ok(_))` per event, `Some(Err(_))` once when the channel
/// fails, then `None` forever. Malformed messages are dropped by the
/// implementation and never surface here.
#[async_trait]
pub trait LiveSubscription: Send {
    async fn next_event(&mut self) -> Option<Result<Event, ChannelError>>;

    /// Release the connection. Idempotent, safe after failure.
    fn close(&mut self);

    /// Number of malformed messages dropped so far
    fn dropped(&self) -> u64 {
        0
    }
}

/// Subscription fed by an in-process channel
///
/// Lets an embedding application push events it received by other means,
/// and is what the aggregator tests drive.
pub struct ChannelSubscription {
    rx: Option<mpsc::Receiver<Result<Event, ChannelError>>>,
}

impl ChannelSubscription {
    pub fn new(rx: mpsc::Receiver<Result<Event, ChannelError>>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Create a subscription together with its feeding sender
    pub fn pair(buffer: usize) -> (mpsc::Sender<Result<Event, ChannelError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl LiveSubscription for ChannelSubscription {
    async fn next_event(&mut self) -> Option<Result<Event, ChannelError>> {
        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Some(Ok(event)) => Some(Ok(event)),
            Some(Err(e)) => {
                self.rx = None;
                Some(Err(e))
            }
            None => {
                self.rx = None;
                Some(Err(ChannelError::Ended))
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Level;
    use chrono::Utc;

    #[tokio::test]
    async fn test_channel_subscription_ends_once() {
        let (tx, mut sub) = ChannelSubscription::pair(4);
        tx.send(Ok(Event::new("e1", Utc::now(), Level::Info, "web", "GET /")))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(sub.next_event().await.unwrap().unwrap().id, "e1");
        assert_eq!(sub.next_event().await, Some(Err(ChannelError::Ended)));
        assert!(sub.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tx, mut sub) = ChannelSubscription::pair(4);
        sub.close();
        sub.close();
        assert!(sub.next_event().await.is_none());
        assert!(tx.is_closed());
    }
}
