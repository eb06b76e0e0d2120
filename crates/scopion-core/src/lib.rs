//! Scopion Core - event model and live feed logic for the Scopion dashboard
//!
//! This crate holds everything the dashboard does with events once they have
//! been fetched, independent of how they are transported.
//!
//! ## Features
//!
//! - **Event Model** - Events, levels and the read-model types served by the API
//! - **Feed Aggregation** - Merge a snapshot fetch with a live push channel
//! - **Error Notifications** - Deduplicated notifications for error events
//! - **Trace Reconstruction** - Flat span timelines from a trace's events
//!
//! ## Quick Start
//!
//! ```no_run
//! use scopion_core::{FeedAggregator, FeedSettings, LiveSource, SnapshotSource};
//! use std::sync::Arc;
//!
//! async fn run(snapshot: Arc<dyn SnapshotSource>, live: Arc<dyn LiveSource>) {
//!     let aggregator = FeedAggregator::new(snapshot, live, FeedSettings::default());
//!     let (handle, task) = aggregator.spawn();
//!
//!     let mut views = handle.subscribe();
//!     while views.changed().await.is_ok() {
//!         println!("{} events", views.borrow().events.len());
//!     }
//!
//!     drop(handle);
//!     let _ = task.await;
//! }
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod model;
pub mod notifications;
pub mod source;
pub mod trace;

// Re-exports for convenience
pub use aggregator::{FeedAggregator, FeedCommand, FeedHandle, COPY_CONFIRMATION};
pub use config::{
    ClientSettings, ConfigError, ConfigLoader, ConfigResult, DashboardConfig, FeedSettings,
    LogSettings, NotificationSettings,
};
pub use error::{ChannelError, MalformedPayloadError, QueryError, QueryResult, TransportError};
pub use events::{short_id, Event, EventData, IngestRequest, Level};
pub use feed::{ChannelStatus, Feed, FeedView, SnapshotStatus, FEED_CAPACITY, LIVE_CAPACITY};
pub use model::{ErrorByService, ServerStatus, ServiceInfo, Stats, ThroughputPoint, TraceSummary};
pub use notifications::{
    ErrorNotifier, Notification, NotificationCenter, NotificationHandle, NotificationService,
    NotificationType,
};
pub use source::{ChannelSubscription, LiveSource, LiveSubscription, SnapshotSource, TraceSource};
pub use trace::{load_trace, reconstruct, Span, TraceTimeline};
