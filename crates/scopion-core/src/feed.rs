//! Feed state - the bounded live/snapshot buffers behind the live view
//!
//! The two buffers are truncated independently on write and only merged on
//! read, so the order in which the snapshot and the first live events land
//! does not change what [`Feed::visible`] returns.

use crate::error::{ChannelError, QueryError};
use crate::events::Event;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Events shown at once
pub const FEED_CAPACITY: usize = 100;

/// Pushed events kept in front of the snapshot
pub const LIVE_CAPACITY: usize = 50;

/// State of the last snapshot fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotStatus {
    Loading,
    Loaded { count: usize },
    /// `retryable` when a fresh fetch may succeed (timeouts, 429, 5xx)
    Failed { error: String, retryable: bool },
}

/// State of the live push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Not subscribed (paused, or not started yet)
    Closed,
    Open,
    /// Failed; stays failed until the feed is paused and resumed
    Failed { error: String },
}

/// Live and snapshot buffers of one feed
#[derive(Debug, Clone)]
pub struct Feed {
    live: VecDeque<Event>,
    snapshot: Vec<Event>,
    paused: bool,
    capacity: usize,
    live_capacity: usize,
    snapshot_status: SnapshotStatus,
    channel_status: ChannelStatus,
}

impl Feed {
    pub fn new(paused: bool) -> Self {
        Self::with_capacity(FEED_CAPACITY, LIVE_CAPACITY, paused)
    }

    pub fn with_capacity(capacity: usize, live_capacity: usize, paused: bool) -> Self {
        Self {
            live: VecDeque::with_capacity(live_capacity + 1),
            snapshot: Vec::new(),
            paused,
            capacity,
            live_capacity,
            snapshot_status: SnapshotStatus::Loading,
            channel_status: ChannelStatus::Closed,
        }
    }

    /// Front-insert a pushed event
    ///
    /// Returns false when the id is already in the live buffer; a
    /// re-delivered event is not a new entry.
    pub fn push_live(&mut self, event: Event) -> bool {
        if self.live.iter().any(|e| e.id == event.id) {
            debug!("Ignoring re-delivered event {}", event.id);
            return false;
        }
        self.live.push_front(event);
        self.live.truncate(self.live_capacity);
        true
    }

    /// Replace the snapshot buffer with a fresh fetch (newest first)
    pub fn set_snapshot(&mut self, mut events: Vec<Event>) {
        events.truncate(self.capacity);
        self.snapshot_status = SnapshotStatus::Loaded {
            count: events.len(),
        };
        self.snapshot = events;
    }

    /// Record a failed fetch; the previous snapshot stays visible
    pub fn snapshot_failed(&mut self, err: &QueryError) {
        self.snapshot_status = SnapshotStatus::Failed {
            error: err.to_string(),
            retryable: err.is_retryable(),
        };
    }

    pub fn channel_opened(&mut self) {
        self.channel_status = ChannelStatus::Open;
    }

    pub fn channel_closed(&mut self) {
        self.channel_status = ChannelStatus::Closed;
    }

    pub fn channel_failed(&mut self, err: &ChannelError) {
        self.channel_status = ChannelStatus::Failed {
            error: err.to_string(),
        };
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn snapshot_status(&self) -> &SnapshotStatus {
        &self.snapshot_status
    }

    pub fn channel_status(&self) -> &ChannelStatus {
        &self.channel_status
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.len()
    }

    /// Live entries, then snapshot entries, truncated to capacity
    ///
    /// Snapshot entries whose id is also in the live buffer are skipped.
    pub fn visible(&self) -> Vec<Event> {
        let live_ids: HashSet<&str> = self.live.iter().map(|e| e.id.as_str()).collect();

        self.live
            .iter()
            .chain(
                self.snapshot
                    .iter()
                    .filter(|e| !live_ids.contains(e.id.as_str())),
            )
            .take(self.capacity)
            .cloned()
            .collect()
    }

    pub fn filter_by_service(&self, service: Option<&str>) -> Vec<Event> {
        filter_by_service(self.visible(), service)
    }
}

impl Default for Feed {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Keep events of one service, preserving order; `None` keeps everything
pub fn filter_by_service(events: Vec<Event>, service: Option<&str>) -> Vec<Event> {
    match service {
        None => events,
        Some(name) => events.into_iter().filter(|e| e.service == name).collect(),
    }
}

/// What a feed looks like right now, as published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedView {
    /// Bumped on every published change
    pub revision: u64,

    /// Newest first
    pub events: Vec<Event>,

    pub paused: bool,

    pub snapshot: SnapshotStatus,

    pub channel: ChannelStatus,

    /// Trace id copied within the last two seconds
    pub copied_trace_id: Option<String>,

    /// Malformed push messages dropped by the current subscription
    pub dropped_messages: u64,
}

impl FeedView {
    pub fn from_feed(feed: &Feed, revision: u64) -> Self {
        Self {
            revision,
            events: feed.visible(),
            paused: feed.is_paused(),
            snapshot: feed.snapshot_status().clone(),
            channel: feed.channel_status().clone(),
            copied_trace_id: None,
            dropped_messages: 0,
        }
    }

    pub fn filter_by_service(&self, service: Option<&str>) -> Vec<Event> {
        filter_by_service(self.events.clone(), service)
    }

    /// The view may be missing recent events
    pub fn is_stale(&self) -> bool {
        matches!(self.snapshot, SnapshotStatus::Failed { .. })
            || matches!(self.channel, ChannelStatus::Failed { .. })
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.snapshot, SnapshotStatus::Loading)
    }
}

impl Default for FeedView {
    fn default() -> Self {
        Self::from_feed(&Feed::default(), 0)
    }
}
