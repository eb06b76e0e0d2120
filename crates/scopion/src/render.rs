//! Text and JSON output for the terminal

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use scopion_core::{
    ChannelStatus, ErrorByService, Event, FeedView, Level, Notification, ServerStatus,
    ServiceInfo, SnapshotStatus, Stats, ThroughputPoint, TraceSummary, TraceTimeline,
};
use serde::Serialize;

/// Width of the span bars in a trace timeline
const TIMELINE_WIDTH: usize = 40;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// "12s ago", "3m ago", "5h ago"
pub fn relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(timestamp).num_seconds().max(0);
    if seconds < 60 {
        format!("{}s ago", seconds)
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else {
        format!("{}h ago", seconds / 3600)
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Info => "INFO ",
        Level::Warn => "WARN ",
        Level::Error => "ERROR",
    }
}

pub fn event_line(event: &Event, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "[{}] {:>8}  {:<16} {}",
        level_tag(event.level),
        relative_time(event.timestamp, now),
        event.service,
        event.name
    );
    if let Some(trace) = event.short_trace_id() {
        line.push_str(&format!("  trace:{}", trace));
    }
    line
}

/// One line per event, or one JSON object per line
pub fn event_lines(events: &[Event], format: OutputFormat, now: DateTime<Utc>) -> Vec<String> {
    events
        .iter()
        .map(|e| match format {
            OutputFormat::Text => event_line(e, now),
            OutputFormat::Json => serde_json::to_string(e).unwrap_or_default(),
        })
        .collect()
}

pub fn notification_line(notification: &Notification) -> String {
    let mut line = format!("! {}: {}", notification.title, notification.message);
    if let Some(trace) = notification.trace_id.as_deref() {
        line.push_str(&format!(" (trace {})", scopion_core::short_id(trace)));
    }
    line
}

/// Summary of the feed state, e.g. `-- live | 42 events | filter: web --`
pub fn status_line(view: &FeedView, filter: Option<&str>, unread: usize) -> String {
    let mut parts = Vec::new();

    parts.push(match &view.channel {
        _ if view.paused => "paused".to_string(),
        ChannelStatus::Open => "live".to_string(),
        ChannelStatus::Closed => "connecting".to_string(),
        ChannelStatus::Failed { error } => {
            format!("disconnected ({}), press p twice to retry", error)
        }
    });

    match &view.snapshot {
        SnapshotStatus::Loading => parts.push("loading".to_string()),
        SnapshotStatus::Loaded { .. } => parts.push(format!("{} events", view.events.len())),
        SnapshotStatus::Failed { error, retryable } => {
            let hint = if *retryable { ", press r to retry" } else { "" };
            parts.push(format!("snapshot failed ({}){}", error, hint))
        }
    }

    if let Some(service) = filter {
        parts.push(format!("filter: {}", service));
    }
    if unread > 0 {
        parts.push(format!("{} unread", unread));
    }
    if view.dropped_messages > 0 {
        parts.push(format!("{} dropped", view.dropped_messages));
    }

    format!("-- {} --", parts.join(" | "))
}

/// Timeline bars for a reconstructed trace
pub fn timeline_lines(timeline: &TraceTimeline) -> Vec<String> {
    let mut lines = vec![format!(
        "Trace {}  {} spans  {}ms  {} errors  services: {}",
        timeline.short_trace_id(),
        timeline.span_count(),
        timeline.wall_duration_ms,
        timeline.error_count,
        timeline.services.join(", ")
    )];

    for span in &timeline.spans {
        let (left, width) = timeline.span_bounds_percent(span);
        let start = ((left / 100.0) * TIMELINE_WIDTH as f64).round() as usize;
        let start = start.min(TIMELINE_WIDTH - 1);
        let len = (((width / 100.0) * TIMELINE_WIDTH as f64).round() as usize)
            .clamp(1, TIMELINE_WIDTH - start);

        let bar_char = if span.has_error { '!' } else { '=' };
        let bar: String = std::iter::repeat(' ')
            .take(start)
            .chain(std::iter::repeat(bar_char).take(len))
            .chain(std::iter::repeat(' ').take(TIMELINE_WIDTH - start - len))
            .collect();

        lines.push(format!(
            "|{}| +{:>6}ms {:>6}ms  {}",
            bar, span.start_offset_ms, span.duration_ms, span.name
        ));
    }

    lines
}

pub fn service_lines(services: &[ServiceInfo], now: DateTime<Utc>) -> Vec<String> {
    services
        .iter()
        .map(|s| {
            format!(
                "{:<20} {:>8} events {:>6} errors  last {}",
                s.name,
                s.event_count,
                s.error_count,
                relative_time(s.last_activity, now)
            )
        })
        .collect()
}

pub fn stats_lines(stats: &Stats) -> Vec<String> {
    vec![
        format!("Total events:    {}", stats.total_events),
        format!("Error rate:      {:.1}%", stats.error_rate),
        format!("Active services: {}", stats.active_services),
    ]
}

pub fn error_lines(errors: &[ErrorByService]) -> Vec<String> {
    errors
        .iter()
        .map(|e| format!("{:<20} {:>6}", e.service, e.count))
        .collect()
}

pub fn throughput_lines(points: &[ThroughputPoint]) -> Vec<String> {
    points
        .iter()
        .map(|p| format!("{:<6} {:>8}", p.time, p.events))
        .collect()
}

pub fn trace_summary_lines(traces: &[TraceSummary], now: DateTime<Utc>) -> Vec<String> {
    traces
        .iter()
        .map(|t| {
            format!(
                "{} {} {:<16} {:<24} {:>6}ms {:>3} spans  {}",
                if t.has_error { "!" } else { " " },
                scopion_core::short_id(&t.id),
                t.service,
                t.name,
                t.duration,
                t.spans,
                relative_time(t.timestamp, now)
            )
        })
        .collect()
}

pub fn server_status_lines(status: &ServerStatus, server_url: &str) -> Vec<String> {
    vec![
        format!("Server:  {}", server_url),
        format!("Version: {}", status.version),
        format!("Demo:    {}", if status.demo_enabled { "on" } else { "off" }),
    ]
}

/// Print `value` as JSON, or the given text lines
pub fn print<T: Serialize>(
    format: OutputFormat,
    value: &T,
    lines: Vec<String>,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => {
            for line in lines {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_time() {
        assert_eq!(relative_time(now(), now()), "0s ago");
        assert_eq!(relative_time(now() - Duration::seconds(59), now()), "59s ago");
        assert_eq!(relative_time(now() - Duration::seconds(60), now()), "1m ago");
        assert_eq!(relative_time(now() - Duration::minutes(59), now()), "59m ago");
        assert_eq!(relative_time(now() - Duration::hours(5), now()), "5h ago");
        assert_eq!(relative_time(now() + Duration::seconds(3), now()), "0s ago");
    }

    #[test]
    fn test_event_line() {
        let event = Event::new(
            "e1",
            now() - Duration::seconds(12),
            Level::Error,
            "api",
            "timeout",
        )
        .with_trace_id("0123456789abcdef");
        let line = event_line(&event, now());
        assert!(line.starts_with("[ERROR]"));
        assert!(line.contains("12s ago"));
        assert!(line.contains("timeout"));
        assert!(line.ends_with("trace:01234567"));
    }

    #[test]
    fn test_json_event_lines() {
        let event = Event::new("e1", now(), Level::Info, "web", "GET /");
        let lines = event_lines(&[event], OutputFormat::Json, now());
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["id"], "e1");
        assert_eq!(value["level"], "info");
    }

    #[test]
    fn test_status_line() {
        let mut view = FeedView::default();
        assert_eq!(status_line(&view, None, 0), "-- connecting | loading --");

        view.channel = ChannelStatus::Open;
        view.snapshot = SnapshotStatus::Loaded { count: 0 };
        view.dropped_messages = 2;
        assert_eq!(
            status_line(&view, Some("web"), 3),
            "-- live | 0 events | filter: web | 3 unread | 2 dropped --"
        );

        view.paused = true;
        assert!(status_line(&view, None, 0).starts_with("-- paused"));

        view.snapshot = SnapshotStatus::Failed {
            error: "Request timed out".to_string(),
            retryable: true,
        };
        assert_eq!(
            status_line(&view, None, 0),
            "-- paused | snapshot failed (Request timed out), press r to retry | 2 dropped --"
        );
    }

    #[test]
    fn test_timeline_lines() {
        let events = vec![
            Event::new("a", now(), Level::Info, "api", "A").with_trace_id("tr1"),
            Event::new("b", now() + Duration::milliseconds(20), Level::Info, "api", "B")
                .with_trace_id("tr1"),
            Event::new("c", now() + Duration::milliseconds(120), Level::Error, "db", "C")
                .with_trace_id("tr1"),
        ];
        let timeline = TraceTimeline::from_events("tr1", events);
        let lines = timeline_lines(&timeline);

        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("3 spans"));
        assert!(lines[0].contains("120ms"));
        assert!(lines[0].contains("api, db"));
        for line in &lines[1..] {
            let bar = &line[1..=TIMELINE_WIDTH];
            assert_eq!(bar.chars().count(), TIMELINE_WIDTH);
        }
        assert!(lines[3].contains('!'));
        assert!(lines[1].starts_with("|="));
    }
}
