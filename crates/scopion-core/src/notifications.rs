//! Error notifications derived from the live feed
//!
//! [`ErrorNotifier`] rescans the head of the feed on every change and turns
//! error events into [`Notification`]s, at most once per trace within a
//! cool-down. [`NotificationCenter`] holds the resulting list.
//! [`NotificationService`] runs both as one task fed with every view an
//! aggregator publishes.

use crate::config::NotificationSettings;
use crate::events::Event;
use crate::feed::FeedView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Notifications kept, newest first
pub const NOTIFICATION_CAPACITY: usize = 50;

/// Feed entries rescanned on each change
pub const RECENT_WINDOW: usize = 10;

/// How long a trace stays silenced after it notified
pub const DEDUP_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Error,
    Warning,
    Info,
}

/// A user-facing alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Fresh id, unrelated to the source event id
    pub id: String,

    #[serde(rename = "type")]
    pub kind: NotificationType,

    pub title: String,

    pub message: String,

    /// When the notification was created
    pub timestamp: DateTime<Utc>,

    pub read: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Notification {
    pub fn new(
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        trace_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            read: false,
            trace_id,
        }
    }

    /// Notification for an error-level event
    pub fn for_error(event: &Event) -> Self {
        Self::new(
            NotificationType::Error,
            format!("Error in {}", event.service),
            event.name.clone(),
            event.trace_id.clone(),
        )
    }
}

/// Bounded notification list, newest first
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    items: VecDeque<Notification>,
    capacity: usize,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Front-insert, dropping the oldest past capacity
    pub fn add(&mut self, notification: Notification) {
        self.items.push_front(notification);
        self.items.truncate(self.capacity);
    }

    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_as_read(&mut self) {
        for n in &mut self.items {
            n.read = true;
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns error events at the head of a feed into notifications
///
/// A trace id that notified is silenced until its expiry; expired entries
/// are pruned on each scan. An event id is handled at most once while it
/// stays in the window, so rescans never re-notify the same event. Events
/// without a trace id only dedup on their own id.
#[derive(Debug)]
pub struct ErrorNotifier {
    /// trace id -> silenced until
    silenced: HashMap<String, Instant>,

    /// error event ids already handled and still inside the window
    handled: HashSet<String>,

    window: usize,

    cooldown: Duration,
}

impl ErrorNotifier {
    pub fn new() -> Self {
        Self::with_settings(RECENT_WINDOW, DEDUP_COOLDOWN)
    }

    pub fn with_settings(window: usize, cooldown: Duration) -> Self {
        Self {
            silenced: HashMap::new(),
            handled: HashSet::new(),
            window,
            cooldown,
        }
    }

    pub fn from_config(settings: &NotificationSettings) -> Self {
        Self::with_settings(settings.recent_window, settings.cooldown())
    }

    /// Scan `events` (newest first) and return new notifications in scan order
    pub fn observe(&mut self, events: &[Event]) -> Vec<Notification> {
        self.observe_at(events, Instant::now())
    }

    pub fn observe_at(&mut self, events: &[Event], now: Instant) -> Vec<Notification> {
        self.silenced.retain(|_, until| *until > now);

        let recent = &events[..events.len().min(self.window)];
        let mut created = Vec::new();

        for event in recent.iter().filter(|e| e.is_error()) {
            if !self.handled.insert(event.id.clone()) {
                continue;
            }

            if let Some(trace_id) = &event.trace_id {
                if self.silenced.contains_key(trace_id) {
                    debug!("Suppressing notification for trace {}", trace_id);
                    continue;
                }
                self.silenced.insert(trace_id.clone(), now + self.cooldown);
            }

            created.push(Notification::for_error(event));
        }

        let in_window: HashSet<&str> = recent.iter().map(|e| e.id.as_str()).collect();
        self.handled.retain(|id| in_window.contains(id.as_str()));

        created
    }

    /// Trace ids currently silenced
    pub fn silenced_count(&self) -> usize {
        self.silenced.len()
    }
}

impl Default for ErrorNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands accepted by a running [`NotificationService`]
#[derive(Debug, Clone)]
pub enum NotificationCommand {
    MarkAllAsRead,
    Clear,
}

/// Handle to a running notification service
///
/// Dropping it stops the service.
pub struct NotificationHandle {
    commands: mpsc::Sender<NotificationCommand>,
    notifications: watch::Receiver<Vec<Notification>>,
}

impl NotificationHandle {
    pub async fn mark_all_as_read(&self) {
        self.send(NotificationCommand::MarkAllAsRead).await;
    }

    pub async fn clear(&self) {
        self.send(NotificationCommand::Clear).await;
    }

    async fn send(&self, cmd: NotificationCommand) {
        if self.commands.send(cmd).await.is_err() {
            debug!("Notification service already stopped");
        }
    }

    /// Receiver of the notification list, republished on every change
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.notifications.clone()
    }

    pub fn current(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }
}

/// Owns one notifier and one notification list, fed by a feed's views
pub struct NotificationService {
    notifier: ErrorNotifier,
    center: NotificationCenter,
}

impl NotificationService {
    pub fn new(settings: &NotificationSettings) -> Self {
        Self {
            notifier: ErrorNotifier::from_config(settings),
            center: NotificationCenter::with_capacity(settings.capacity),
        }
    }

    /// Start scanning `feed` in a background task
    ///
    /// `feed` should carry every change, see
    /// [`FeedAggregator::changes`](crate::aggregator::FeedAggregator::changes).
    pub fn spawn(
        self,
        feed: mpsc::Receiver<FeedView>,
    ) -> (NotificationHandle, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (list_tx, list_rx) = watch::channel(Vec::new());

        let task = tokio::spawn(self.run(feed, cmd_rx, list_tx));

        (
            NotificationHandle {
                commands: cmd_tx,
                notifications: list_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut feed: mpsc::Receiver<FeedView>,
        mut commands: mpsc::Receiver<NotificationCommand>,
        list: watch::Sender<Vec<Notification>>,
    ) {
        info!("Notification service started");

        loop {
            tokio::select! {
                view = feed.recv() => {
                    let Some(view) = view else {
                        debug!("Feed closed, stopping notification service");
                        break;
                    };
                    if self.scan(&view.events) {
                        list.send_replace(self.center.to_vec());
                    }
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("Notification handle dropped, stopping");
                        break;
                    };
                    self.apply(cmd);
                    list.send_replace(self.center.to_vec());
                }
            }
        }

        info!("Notification service stopped");
    }

    fn scan(&mut self, events: &[Event]) -> bool {
        let created = self.notifier.observe(events);
        let changed = !created.is_empty();
        for n in created {
            info!("{}: {}", n.title, n.message);
            self.center.add(n);
        }
        if changed {
            debug!("{} traces silenced", self.notifier.silenced_count());
        }
        changed
    }

    fn apply(&mut self, cmd: NotificationCommand) {
        match cmd {
            NotificationCommand::MarkAllAsRead => self.center.mark_all_as_read(),
            NotificationCommand::Clear => self.center.clear(),
        }
    }
}
