//! Trace reconstruction - turning the events of one trace into a timeline
//!
//! Events carry no parent reference, so the timeline is flat: one span per
//! event, each lasting until the next event starts.

use crate::error::QueryResult;
use crate::events::{short_id, Event, EventData};
use crate::source::TraceSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shortest duration given to any span
pub const MIN_SPAN_DURATION_MS: u64 = 1;

/// One event of a trace, placed on the trace's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Source event id
    pub id: String,

    pub name: String,

    /// Milliseconds until the next event (at least 1)
    #[serde(rename = "duration")]
    pub duration_ms: u64,

    /// Milliseconds since the trace's first event
    #[serde(rename = "startOffset")]
    pub start_offset_ms: u64,

    pub has_error: bool,

    /// Present iff `has_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default)]
    pub metadata: EventData,

    /// Always empty, see module docs
    #[serde(default)]
    pub children: Vec<Span>,
}

impl Span {
    /// Offset at which the span ends
    pub fn end_offset_ms(&self) -> u64 {
        self.start_offset_ms + self.duration_ms
    }
}

/// Build spans from events sorted by ascending timestamp
///
/// Produces exactly one span per event. An empty input gives no spans.
pub fn reconstruct(events: &[Event]) -> Vec<Span> {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return Vec::new();
    };
    let start = first.timestamp;
    let end = last.timestamp;

    events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let next = events.get(i + 1).map(|e| e.timestamp).unwrap_or(end);
            let has_error = event.is_error();

            Span {
                id: event.id.clone(),
                name: event.name.clone(),
                duration_ms: millis_between(event.timestamp, next).max(MIN_SPAN_DURATION_MS),
                start_offset_ms: millis_between(start, event.timestamp),
                has_error,
                error_message: has_error.then(|| event.name.clone()),
                metadata: event.data.clone().unwrap_or_default(),
                children: Vec::new(),
            }
        })
        .collect()
}

/// Non-negative milliseconds from `from` to `to`
fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    to.signed_duration_since(from).num_milliseconds().max(0) as u64
}

/// A reconstructed trace with its summary figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTimeline {
    pub trace_id: String,

    pub started_at: Option<DateTime<Utc>>,

    pub spans: Vec<Span>,

    /// First to last event, at least 1ms when the trace has any span
    pub wall_duration_ms: u64,

    /// Latest span end offset, `max(start_offset + duration)`; one minimum
    /// span longer than the wall duration
    pub extent_ms: u64,

    pub error_count: usize,

    /// Services seen, in first-appearance order
    pub services: Vec<String>,
}

impl TraceTimeline {
    /// Reconstruct from events in any order; they are stably sorted first
    pub fn from_events(trace_id: impl Into<String>, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp);

        let spans = reconstruct(&events);
        let wall_duration_ms = match (events.first(), events.last()) {
            (Some(first), Some(last)) => {
                millis_between(first.timestamp, last.timestamp).max(MIN_SPAN_DURATION_MS)
            }
            _ => 0,
        };

        let mut services: Vec<String> = Vec::new();
        for e in &events {
            if !services.contains(&e.service) {
                services.push(e.service.clone());
            }
        }

        Self {
            trace_id: trace_id.into(),
            started_at: events.first().map(|e| e.timestamp),
            error_count: spans.iter().filter(|s| s.has_error).count(),
            extent_ms: spans.iter().map(Span::end_offset_ms).max().unwrap_or(0),
            spans,
            wall_duration_ms,
            services,
        }
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn has_error(&self) -> bool {
        self.error_count > 0
    }

    pub fn short_trace_id(&self) -> &str {
        short_id(&self.trace_id)
    }

    /// Position of a span on a 0..=100 scale, as (left, width) percentages
    pub fn span_bounds_percent(&self, span: &Span) -> (f64, f64) {
        let total = self.extent_ms.max(1) as f64;
        (
            span.start_offset_ms as f64 / total * 100.0,
            span.duration_ms as f64 / total * 100.0,
        )
    }
}

/// Query the events of `trace_id` and reconstruct them
pub async fn load_trace(source: &dyn TraceSource, trace_id: &str) -> QueryResult<TraceTimeline> {
    let events = source.trace_events(trace_id).await?;
    debug!("Reconstructing trace {} from {} events", trace_id, events.len());

    // the query may return neighbours of other traces
    let events = events
        .into_iter()
        .filter(|e| e.trace_id.as_deref() == Some(trace_id))
        .collect();

    Ok(TraceTimeline::from_events(trace_id, events))
}
