//! Feed aggregator - merges the snapshot fetch and the live channel
//!
//! One aggregator owns one [`Feed`] and at most one live subscription. It can
//! be driven directly (tests, embedding) or spawned as a task that takes
//! [`FeedCommand`]s and publishes a [`FeedView`] after every change.
//!
//! The `watch` view only keeps the latest revision. Consumers that must see
//! every change (the error notifier) register with [`FeedAggregator::changes`]
//! before spawning.

use crate::config::FeedSettings;
use crate::error::{ChannelError, QueryResult};
use crate::events::Event;
use crate::feed::{Feed, FeedView};
use crate::source::{LiveSource, LiveSubscription, SnapshotSource};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How long a copied trace id stays flagged in the view
pub const COPY_CONFIRMATION: Duration = Duration::from_secs(2);

/// Views buffered per change observer before the aggregator waits
const CHANGE_BUFFER: usize = 64;

type SnapshotFuture = Pin<Box<dyn Future<Output = QueryResult<Vec<Event>>> + Send>>;

/// Commands accepted by a running aggregator
#[derive(Debug, Clone)]
pub enum FeedCommand {
    SetPaused(bool),
    TogglePause,
    Refresh,
    CopyTraceId(String),
    Shutdown,
}

/// Owns a feed and drives its two sources
pub struct FeedAggregator {
    snapshot_source: Arc<dyn SnapshotSource>,
    live_source: Arc<dyn LiveSource>,
    settings: FeedSettings,
    feed: Feed,
    subscription: Option<Box<dyn LiveSubscription>>,
    revision: u64,
    copied: Option<String>,
    observers: Vec<mpsc::Sender<FeedView>>,
}

impl FeedAggregator {
    pub fn new(
        snapshot_source: Arc<dyn SnapshotSource>,
        live_source: Arc<dyn LiveSource>,
        settings: FeedSettings,
    ) -> Self {
        let feed = Feed::new(settings.start_paused);
        Self {
            snapshot_source,
            live_source,
            settings,
            feed,
            subscription: None,
            revision: 0,
            copied: None,
            observers: Vec::new(),
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// A live subscription is currently held
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Open the channel unless paused, then fetch the snapshot once
    pub async fn start(&mut self) {
        if !self.feed.is_paused() {
            self.open_channel().await;
        }
        self.refresh().await;
    }

    /// Fetch the snapshot and apply the result
    pub async fn refresh(&mut self) {
        let result = self
            .snapshot_source
            .fetch_recent(self.settings.snapshot_limit)
            .await;
        self.apply_snapshot(result);
    }

    /// Pause closes the channel, resume reopens it. Returns false when the
    /// feed was already in the requested state.
    pub async fn set_paused(&mut self, paused: bool) -> bool {
        if self.feed.is_paused() == paused {
            return false;
        }

        self.feed.set_paused(paused);
        if paused {
            info!("Live feed paused");
            self.close_channel();
        } else {
            info!("Live feed resumed");
            self.open_channel().await;
        }
        true
    }

    /// Subscribe to the live source; no-op while a subscription is held
    pub async fn open_channel(&mut self) {
        if self.subscription.is_some() {
            return;
        }

        match self.live_source.open().await {
            Ok(subscription) => {
                debug!("Live channel opened");
                self.subscription = Some(subscription);
                self.feed.channel_opened();
            }
            Err(e) => {
                warn!("Failed to open live channel: {}", e);
                self.feed.channel_failed(&e);
            }
        }
    }

    /// Release the live subscription, if any
    pub fn close_channel(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
            debug!("Live channel closed");
        }
        self.feed.channel_closed();
    }

    pub fn apply_snapshot(&mut self, result: QueryResult<Vec<Event>>) {
        match result {
            Ok(events) => {
                debug!("Snapshot loaded with {} events", events.len());
                self.feed.set_snapshot(events);
            }
            Err(e) => {
                warn!("Failed to load snapshot: {}", e);
                self.feed.snapshot_failed(&e);
            }
        }
    }

    /// Apply one item read from the live subscription
    ///
    /// A failure (or an unexpected end) drops the subscription and marks the
    /// channel failed; nothing reopens it until the feed is resumed.
    pub fn apply_live(&mut self, item: Option<Result<Event, ChannelError>>) -> bool {
        let err = match item {
            Some(Ok(event)) => return self.feed.push_live(event),
            Some(Err(e)) => e,
            None => ChannelError::Ended,
        };

        warn!("Live channel failed: {}", err);
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        self.feed.channel_failed(&err);
        true
    }

    pub fn copy_trace_id(&mut self, trace_id: impl Into<String>) {
        self.copied = Some(trace_id.into());
    }

    pub fn clear_copied(&mut self) {
        self.copied = None;
    }

    /// Current view at the current revision
    pub fn view(&self) -> FeedView {
        let mut view = FeedView::from_feed(&self.feed, self.revision);
        view.copied_trace_id = self.copied.clone();
        view.dropped_messages = self
            .subscription
            .as_ref()
            .map(|s| s.dropped())
            .unwrap_or(0);
        view
    }

    /// Receive every view the spawned task publishes, in order
    ///
    /// No revision is skipped: once the buffer is full the aggregator waits
    /// for the receiver. A dropped receiver is forgotten on the next publish.
    pub fn changes(&mut self) -> mpsc::Receiver<FeedView> {
        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        self.observers.push(tx);
        rx
    }

    async fn publish(&mut self, tx: &watch::Sender<FeedView>) {
        self.revision += 1;
        let view = self.view();

        let mut open = Vec::with_capacity(self.observers.len());
        for observer in std::mem::take(&mut self.observers) {
            if observer.send(view.clone()).await.is_ok() {
                open.push(observer);
            } else {
                debug!("Change observer dropped");
            }
        }
        self.observers = open;

        tx.send_replace(view);
    }

    fn snapshot_future(&self) -> SnapshotFuture {
        let source = Arc::clone(&self.snapshot_source);
        let limit = self.settings.snapshot_limit;
        Box::pin(async move { source.fetch_recent(limit).await })
    }

    /// Run the aggregator in a background task
    ///
    /// The task stops on [`FeedCommand::Shutdown`] or when the handle is
    /// dropped, closing the live channel on the way out.
    pub fn spawn(self) -> (FeedHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (view_tx, view_rx) = watch::channel(self.view());

        let task = tokio::spawn(self.run(cmd_rx, view_tx));

        (
            FeedHandle {
                commands: cmd_tx,
                view: view_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<FeedCommand>,
        view: watch::Sender<FeedView>,
    ) {
        info!("Feed aggregator started");

        if !self.feed.is_paused() {
            self.open_channel().await;
        }
        let mut pending: Option<SnapshotFuture> = Some(self.snapshot_future());
        let mut ticker = self.settings.refresh_interval().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut copied_until: Option<Instant> = None;
        self.publish(&view).await;

        loop {
            tokio::select! {
                result = poll_snapshot(&mut pending) => {
                    pending = None;
                    self.apply_snapshot(result);
                    self.publish(&view).await;
                }
                item = next_live(&mut self.subscription) => {
                    if self.apply_live(item) {
                        self.publish(&view).await;
                    }
                }
                _ = tick(&mut ticker) => {
                    if pending.is_none() {
                        pending = Some(self.snapshot_future());
                    }
                }
                _ = sleep_until(copied_until) => {
                    copied_until = None;
                    self.clear_copied();
                    self.publish(&view).await;
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("Feed handle dropped, stopping aggregator");
                        break;
                    };
                    match cmd {
                        FeedCommand::SetPaused(paused) => {
                            if self.set_paused(paused).await {
                                self.publish(&view).await;
                            }
                        }
                        FeedCommand::TogglePause => {
                            let paused = !self.feed.is_paused();
                            self.set_paused(paused).await;
                            self.publish(&view).await;
                        }
                        FeedCommand::Refresh => {
                            if pending.is_some() {
                                debug!("Snapshot fetch already in flight");
                            } else {
                                pending = Some(self.snapshot_future());
                            }
                        }
                        FeedCommand::CopyTraceId(trace_id) => {
                            copied_until = Some(Instant::now() + COPY_CONFIRMATION);
                            self.copy_trace_id(trace_id);
                            self.publish(&view).await;
                        }
                        FeedCommand::Shutdown => break,
                    }
                }
            }
        }

        self.close_channel();
        info!("Feed aggregator stopped");
    }
}

async fn poll_snapshot(pending: &mut Option<SnapshotFuture>) -> QueryResult<Vec<Event>> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_live(
    subscription: &mut Option<Box<dyn LiveSubscription>>,
) -> Option<Result<Event, ChannelError>> {
    match subscription {
        Some(s) => s.next_event().await,
        None => std::future::pending().await,
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running aggregator
///
/// Dropping every clone stops the aggregator.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    view: watch::Receiver<FeedView>,
}

impl FeedHandle {
    pub async fn set_paused(&self, paused: bool) {
        self.send(FeedCommand::SetPaused(paused)).await;
    }

    pub async fn toggle_pause(&self) {
        self.send(FeedCommand::TogglePause).await;
    }

    pub async fn refresh(&self) {
        self.send(FeedCommand::Refresh).await;
    }

    pub async fn copy_trace_id(&self, trace_id: impl Into<String>) {
        self.send(FeedCommand::CopyTraceId(trace_id.into())).await;
    }

    pub async fn shutdown(&self) {
        self.send(FeedCommand::Shutdown).await;
    }

    async fn send(&self, cmd: FeedCommand) {
        if self.commands.send(cmd).await.is_err() {
            debug!("Feed aggregator already stopped");
        }
    }

    /// Receiver of the feed view, republished on every change
    pub fn subscribe(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationSettings;
    use crate::error::{QueryError, TransportError};
    use crate::events::Level;
    use crate::feed::{ChannelStatus, SnapshotStatus};
    use crate::notifications::NotificationService;
    use crate::source::ChannelSubscription;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn event(id: &str) -> Event {
        Event::new(id, Utc::now(), Level::Info, "web", "GET /")
    }

    struct MockSnapshot {
        result: QueryResult<Vec<Event>>,
        calls: AtomicUsize,
    }

    impl MockSnapshot {
        fn new(result: QueryResult<Vec<Event>>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SnapshotSource for MockSnapshot {
        async fn fetch_recent(&self, _limit: usize) -> QueryResult<Vec<Event>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Counts opens and closes; keeps the feeding senders for the test
    #[derive(Default)]
    struct MockLive {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        senders: Mutex<Vec<mpsc::Sender<Result<Event, ChannelError>>>>,
        refuse: bool,
    }

    impl MockLive {
        fn active(&self) -> usize {
            self.opens.load(Ordering::SeqCst) - self.closes.load(Ordering::SeqCst)
        }

        fn sender(&self) -> mpsc::Sender<Result<Event, ChannelError>> {
            self.senders.lock().unwrap().last().cloned().unwrap()
        }
    }

    struct CountingSubscription {
        inner: ChannelSubscription,
        closed: bool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LiveSubscription for CountingSubscription {
        async fn next_event(&mut self) -> Option<Result<Event, ChannelError>> {
            self.inner.next_event().await
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.close();
        }
    }

    #[async_trait]
    impl LiveSource for MockLive {
        async fn open(&self) -> Result<Box<dyn LiveSubscription>, ChannelError> {
            if self.refuse {
                return Err(ChannelError::Status(503));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, inner) = ChannelSubscription::pair(16);
            self.senders.lock().unwrap().push(tx);
            Ok(Box::new(CountingSubscription {
                inner,
                closed: false,
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn aggregator(
        snapshot: Arc<MockSnapshot>,
        live: Arc<MockLive>,
        start_paused: bool,
    ) -> FeedAggregator {
        let settings = FeedSettings {
            start_paused,
            ..Default::default()
        };
        FeedAggregator::new(snapshot, live, settings)
    }

    #[tokio::test]
    async fn test_pause_resume_keeps_one_subscription() {
        let live = Arc::new(MockLive::default());
        let mut agg = aggregator(MockSnapshot::new(Ok(vec![])), Arc::clone(&live), false);

        agg.start().await;
        assert_eq!(live.active(), 1);

        assert!(agg.set_paused(true).await);
        assert!(!agg.set_paused(true).await);
        assert_eq!(live.active(), 0);
        assert_eq!(agg.feed().channel_status(), &ChannelStatus::Closed);

        assert!(agg.set_paused(false).await);
        assert!(!agg.set_paused(false).await);
        agg.open_channel().await;

        assert_eq!(live.opens.load(Ordering::SeqCst), 2);
        assert_eq!(live.active(), 1);
        assert_eq!(agg.feed().channel_status(), &ChannelStatus::Open);
    }

    #[tokio::test]
    async fn test_start_paused_does_not_subscribe() {
        let live = Arc::new(MockLive::default());
        let snapshot = MockSnapshot::new(Ok(vec![event("s1")]));
        let mut agg = aggregator(Arc::clone(&snapshot), Arc::clone(&live), true);

        agg.start().await;
        assert_eq!(live.opens.load(Ordering::SeqCst), 0);
        assert_eq!(snapshot.calls.load(Ordering::SeqCst), 1);
        assert_eq!(agg.view().events.len(), 1);
        assert!(agg.view().paused);
    }

    #[tokio::test]
    async fn test_live_before_snapshot() {
        let live = Arc::new(MockLive::default());
        let mut agg = aggregator(MockSnapshot::new(Ok(vec![])), live, false);

        agg.apply_live(Some(Ok(event("l1"))));
        assert!(agg.view().is_loading());

        agg.apply_snapshot(Ok(vec![event("s1"), event("s2")]));
        let ids: Vec<String> = agg.view().events.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["l1", "s1", "s2"]);
    }

    #[tokio::test]
    async fn test_channel_failure_keeps_feed_until_resume() {
        let live = Arc::new(MockLive::default());
        let mut agg = aggregator(
            MockSnapshot::new(Ok(vec![event("s1")])),
            Arc::clone(&live),
            false,
        );
        agg.start().await;
        agg.apply_live(Some(Ok(event("l1"))));

        agg.apply_live(Some(Err(ChannelError::Stream("reset".to_string()))));
        let view = agg.view();
        assert!(view.is_stale());
        assert_eq!(view.events.len(), 2);
        assert!(!agg.is_subscribed());
        assert_eq!(live.active(), 0);

        // only a pause/resume cycle reconnects
        agg.set_paused(true).await;
        agg.set_paused(false).await;
        assert_eq!(agg.feed().channel_status(), &ChannelStatus::Open);
        assert_eq!(live.active(), 1);
    }

    #[tokio::test]
    async fn test_refused_channel_marks_failed() {
        let live = Arc::new(MockLive {
            refuse: true,
            ..Default::default()
        });
        let mut agg = aggregator(MockSnapshot::new(Ok(vec![])), live, false);
        agg.start().await;

        assert!(!agg.is_subscribed());
        assert!(matches!(
            agg.feed().channel_status(),
            ChannelStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_snapshot_failure_sets_state() {
        let err = QueryError::Transport(TransportError::status(500, "boom"));
        let mut agg = aggregator(
            MockSnapshot::new(Err(err)),
            Arc::new(MockLive::default()),
            false,
        );
        agg.start().await;
        agg.apply_live(Some(Ok(event("l1"))));

        let view = agg.view();
        assert!(matches!(view.snapshot, SnapshotStatus::Failed { .. }));
        assert!(view.is_stale());
        assert_eq!(view.events.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_aggregator_merges_sources() {
        let live = Arc::new(MockLive::default());
        let agg = aggregator(
            MockSnapshot::new(Ok(vec![event("s1")])),
            Arc::clone(&live),
            false,
        );
        let (handle, task) = agg.spawn();
        let mut views = handle.subscribe();

        tokio::time::timeout(
            Duration::from_secs(5),
            views.wait_for(|v| matches!(v.snapshot, SnapshotStatus::Loaded { .. })),
        )
        .await
        .unwrap()
        .unwrap();

        live.sender().send(Ok(event("l1"))).await.unwrap();
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            views.wait_for(|v| v.events.len() == 2),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(view.events[0].id, "l1");
        assert!(view.revision > 0);

        handle.toggle_pause().await;
        tokio::time::timeout(Duration::from_secs(5), views.wait_for(|v| v.paused))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.active(), 0);

        handle.set_paused(false).await;
        tokio::time::timeout(Duration::from_secs(5), views.wait_for(|v| !v.paused))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.active(), 1);

        drop(views);
        drop(handle);
        task.await.unwrap();
        assert_eq!(live.active(), 0);
    }

    #[tokio::test]
    async fn test_error_pushed_out_by_burst_still_notifies() {
        let live = Arc::new(MockLive::default());
        let mut agg = aggregator(MockSnapshot::new(Ok(vec![])), Arc::clone(&live), false);
        let changes = agg.changes();
        let (handle, task) = agg.spawn();
        let (notifications, notify_task) =
            NotificationService::new(&NotificationSettings::default()).spawn(changes);
        let mut views = handle.subscribe();

        tokio::time::timeout(
            Duration::from_secs(5),
            views.wait_for(|v| v.channel == ChannelStatus::Open && !v.is_loading()),
        )
        .await
        .unwrap()
        .unwrap();

        let tx = live.sender();
        let failing = Event::new("err", Utc::now(), Level::Error, "api", "timeout")
            .with_trace_id("tr1");
        tx.send(Ok(failing)).await.unwrap();
        for i in 0..12 {
            tx.send(Ok(event(&format!("i{i}")))).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), views.wait_for(|v| v.events.len() == 13))
            .await
            .unwrap()
            .unwrap();
        // the error is no longer among the newest ten
        assert!(handle.current().events[..10].iter().all(|e| !e.is_error()));

        let mut list = notifications.subscribe();
        let current = tokio::time::timeout(Duration::from_secs(5), list.wait_for(|l| !l.is_empty()))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].trace_id.as_deref(), Some("tr1"));

        handle.shutdown().await;
        task.await.unwrap();
        notify_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_copied_trace_id_clears_after_confirmation() {
        let agg = aggregator(
            MockSnapshot::new(Ok(vec![])),
            Arc::new(MockLive::default()),
            true,
        );
        let (handle, task) = agg.spawn();
        let mut views = handle.subscribe();

        handle.copy_trace_id("tr1").await;
        views
            .wait_for(|v| v.copied_trace_id.as_deref() == Some("tr1"))
            .await
            .unwrap();
        let copied_at = Instant::now();

        views.wait_for(|v| v.copied_trace_id.is_none()).await.unwrap();
        assert!(copied_at.elapsed() >= COPY_CONFIRMATION);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_refetches_snapshot() {
        let snapshot = MockSnapshot::new(Ok(vec![event("s1")]));
        let agg = aggregator(Arc::clone(&snapshot), Arc::new(MockLive::default()), true);
        let (handle, task) = agg.spawn();
        let mut views = handle.subscribe();

        views.wait_for(|v| !v.is_loading()).await.unwrap();
        handle.refresh().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while snapshot.calls.load(Ordering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await;
        task.await.unwrap();
    }
}
