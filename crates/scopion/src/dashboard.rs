//! Live view - the feed and its notifications printed as they change

use crate::render::{self, OutputFormat};
use chrono::{DateTime, Utc};
use scopion_client::{ApiClient, LiveChannel};
use scopion_core::{DashboardConfig, FeedAggregator, FeedView, Notification, NotificationService};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub const HELP: &str = "commands: p pause/resume | r refresh | f [service] filter | \
c [trace] copy trace id | m mark read | x clear notifications | q quit";

/// A line typed into the live view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCommand {
    TogglePause,
    Refresh,
    /// `None` clears the filter
    Filter(Option<String>),
    /// `None` copies the newest visible trace
    Copy(Option<String>),
    MarkAllRead,
    ClearNotifications,
    Quit,
}

pub fn parse_command(line: &str) -> Option<LiveCommand> {
    let line = line.trim();
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (line, None),
    };
    let arg = arg.map(str::to_string);

    match (cmd, arg) {
        ("p", None) => Some(LiveCommand::TogglePause),
        ("r", None) => Some(LiveCommand::Refresh),
        ("f", service) => Some(LiveCommand::Filter(service)),
        ("c", trace) => Some(LiveCommand::Copy(trace)),
        ("m", None) => Some(LiveCommand::MarkAllRead),
        ("x", None) => Some(LiveCommand::ClearNotifications),
        ("q", None) => Some(LiveCommand::Quit),
        _ => None,
    }
}

/// Turns successive views into the lines to print
///
/// Events are printed once, oldest first; the status line is printed when
/// it changes.
pub struct LiveRenderer {
    format: OutputFormat,
    filter: Option<String>,
    printed: HashSet<String>,
    seen_notifications: HashSet<String>,
    last_status: Option<String>,
    last_copied: Option<String>,
    unread: usize,
}

impl LiveRenderer {
    pub fn new(format: OutputFormat, filter: Option<String>) -> Self {
        Self {
            format,
            filter,
            printed: HashSet::new(),
            seen_notifications: HashSet::new(),
            last_status: None,
            last_copied: None,
            unread: 0,
        }
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Change the filter; the next view is printed in full
    pub fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter;
        self.printed.clear();
        self.last_status = None;
    }

    pub fn on_view(&mut self, view: &FeedView, now: DateTime<Utc>) -> Vec<String> {
        let mut lines = Vec::new();

        let fresh: Vec<_> = view
            .filter_by_service(self.filter.as_deref())
            .into_iter()
            .filter(|e| !self.printed.contains(&e.id))
            .rev()
            .collect();
        lines.extend(render::event_lines(&fresh, self.format, now));
        self.printed.extend(fresh.into_iter().map(|e| e.id));
        self.printed
            .retain(|id| view.events.iter().any(|e| &e.id == id));

        if self.format == OutputFormat::Json {
            return lines;
        }

        if view.copied_trace_id != self.last_copied {
            if let Some(trace) = &view.copied_trace_id {
                lines.push(format!("Copied trace id {}", trace));
            }
            self.last_copied = view.copied_trace_id.clone();
        }

        let status = render::status_line(view, self.filter.as_deref(), self.unread);
        if self.last_status.as_deref() != Some(status.as_str()) {
            lines.push(status.clone());
            self.last_status = Some(status);
        }

        lines
    }

    pub fn on_notifications(&mut self, notifications: &[Notification]) -> Vec<String> {
        let lines = notifications
            .iter()
            .rev()
            .filter(|n| !self.seen_notifications.contains(&n.id))
            .map(|n| match self.format {
                OutputFormat::Text => render::notification_line(n),
                OutputFormat::Json => serde_json::to_string(n).unwrap_or_default(),
            })
            .collect();

        self.seen_notifications = notifications.iter().map(|n| n.id.clone()).collect();
        self.unread = notifications.iter().filter(|n| !n.read).count();
        lines
    }
}

/// Newest visible trace id under the current filter
fn newest_trace(view: &FeedView, filter: Option<&str>) -> Option<String> {
    view.filter_by_service(filter)
        .into_iter()
        .find_map(|e| e.trace_id)
}

fn emit(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

/// Run the live view until `q`, Ctrl-C or the feed stops
pub async fn run(
    config: &DashboardConfig,
    filter: Option<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let api = Arc::new(ApiClient::from_settings(&config.client)?);
    let live = Arc::new(LiveChannel::from_settings(&config.client)?);

    let mut aggregator = FeedAggregator::new(api, live, config.feed.clone());
    let changes = aggregator.changes();
    let (feed, feed_task) = aggregator.spawn();
    let (notifications, notify_task) =
        NotificationService::new(&config.notifications).spawn(changes);

    info!("Live view connected to {}", config.client.server_url);
    if format == OutputFormat::Text {
        eprintln!("{}", HELP);
    }

    let mut views = feed.subscribe();
    let mut list = notifications.subscribe();
    let mut renderer = LiveRenderer::new(format, filter);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                emit(renderer.on_view(&view, Utc::now()));
            }
            changed = list.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = list.borrow_and_update().clone();
                emit(renderer.on_notifications(&current));
            }
            line = stdin.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_command(&line) {
                    Some(LiveCommand::TogglePause) => feed.toggle_pause().await,
                    Some(LiveCommand::Refresh) => feed.refresh().await,
                    Some(LiveCommand::Filter(service)) => {
                        renderer.set_filter(service);
                        let view = views.borrow().clone();
                        emit(renderer.on_view(&view, Utc::now()));
                    }
                    Some(LiveCommand::Copy(trace)) => {
                        let trace = trace.or_else(|| {
                            newest_trace(&views.borrow(), renderer.filter())
                        });
                        match trace {
                            Some(trace) => feed.copy_trace_id(trace).await,
                            None => eprintln!("No trace to copy"),
                        }
                    }
                    Some(LiveCommand::MarkAllRead) => notifications.mark_all_as_read().await,
                    Some(LiveCommand::ClearNotifications) => notifications.clear().await,
                    Some(LiveCommand::Quit) => break,
                    None => eprintln!("{}", HELP),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    feed.shutdown().await;
    drop(notifications);
    drop(feed);
    feed_task.await?;
    notify_task.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scopion_core::{ChannelStatus, Event, Level, SnapshotStatus};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    fn event(id: &str, service: &str) -> Event {
        Event::new(id, now(), Level::Info, service, "tick")
    }

    fn view(events: Vec<Event>) -> FeedView {
        FeedView {
            revision: 1,
            events,
            paused: false,
            snapshot: SnapshotStatus::Loaded { count: 0 },
            channel: ChannelStatus::Open,
            copied_trace_id: None,
            dropped_messages: 0,
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("p"), Some(LiveCommand::TogglePause));
        assert_eq!(parse_command(" r "), Some(LiveCommand::Refresh));
        assert_eq!(
            parse_command("f web"),
            Some(LiveCommand::Filter(Some("web".to_string())))
        );
        assert_eq!(parse_command("f"), Some(LiveCommand::Filter(None)));
        assert_eq!(
            parse_command("c tr1"),
            Some(LiveCommand::Copy(Some("tr1".to_string())))
        );
        assert_eq!(parse_command("c"), Some(LiveCommand::Copy(None)));
        assert_eq!(parse_command("m"), Some(LiveCommand::MarkAllRead));
        assert_eq!(parse_command("x"), Some(LiveCommand::ClearNotifications));
        assert_eq!(parse_command("q"), Some(LiveCommand::Quit));
        assert_eq!(parse_command("q now"), None);
        assert_eq!(parse_command("help"), None);
    }

    #[test]
    fn test_events_printed_once_oldest_first() {
        let mut renderer = LiveRenderer::new(OutputFormat::Json, None);

        let first = renderer.on_view(&view(vec![event("e2", "web"), event("e1", "web")]), now());
        let ids: Vec<String> = first
            .iter()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["id"].to_string())
            .collect();
        assert_eq!(ids, vec!["\"e1\"", "\"e2\""]);

        let second = renderer.on_view(
            &view(vec![event("e3", "web"), event("e2", "web"), event("e1", "web")]),
            now(),
        );
        assert_eq!(second.len(), 1);
        assert!(second[0].contains("e3"));
    }

    #[test]
    fn test_filter_reprints_matching_events() {
        let mut renderer = LiveRenderer::new(OutputFormat::Text, None);
        let current = view(vec![event("e2", "db"), event("e1", "web")]);
        renderer.on_view(&current, now());

        renderer.set_filter(Some("web".to_string()));
        let lines = renderer.on_view(&current, now());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("web"));
        assert!(lines[1].contains("filter: web"));
    }

    #[test]
    fn test_status_printed_on_change_only() {
        let mut renderer = LiveRenderer::new(OutputFormat::Text, None);
        let mut current = view(vec![]);
        assert_eq!(renderer.on_view(&current, now()).len(), 1);
        assert!(renderer.on_view(&current, now()).is_empty());

        current.paused = true;
        let lines = renderer.on_view(&current, now());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("paused"));
    }

    #[test]
    fn test_copy_confirmation_printed() {
        let mut renderer = LiveRenderer::new(OutputFormat::Text, None);
        let mut current = view(vec![]);
        renderer.on_view(&current, now());

        current.copied_trace_id = Some("tr1".to_string());
        let lines = renderer.on_view(&current, now());
        assert_eq!(lines, vec!["Copied trace id tr1".to_string()]);
        assert!(renderer.on_view(&current, now()).is_empty());
    }

    #[test]
    fn test_new_notifications_printed() {
        let mut renderer = LiveRenderer::new(OutputFormat::Text, None);
        let failing = Event::new("e1", now(), Level::Error, "api", "timeout").with_trace_id("tr1");
        let first = Notification::for_error(&failing);

        let lines = renderer.on_notifications(std::slice::from_ref(&first));
        assert_eq!(lines, vec!["! Error in api: timeout (trace tr1)".to_string()]);
        assert!(renderer.on_notifications(std::slice::from_ref(&first)).is_empty());
    }

    #[test]
    fn test_newest_trace() {
        let current = view(vec![
            event("e3", "web"),
            event("e2", "db").with_trace_id("tr-db"),
            event("e1", "web").with_trace_id("tr-web"),
        ]);
        assert_eq!(newest_trace(&current, None).as_deref(), Some("tr-db"));
        assert_eq!(newest_trace(&current, Some("web")).as_deref(), Some("tr-web"));
        assert!(newest_trace(&current, Some("cache")).is_none());
    }
}
