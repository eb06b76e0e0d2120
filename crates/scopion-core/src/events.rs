//! Telemetry event model
//!
//! Events arrive from two places, the `/api/events` snapshot and the
//! `/api/live` push stream, in the same JSON shape.

use crate::error::MalformedPayloadError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map attached to an event, used as span metadata
pub type EventData = BTreeMap<String, serde_json::Value>;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Level::Error)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!(
                "Invalid level: {}. Must be one of: info, warn, error",
                other
            )),
        }
    }
}

/// One telemetry record emitted by a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable across snapshot and push delivery
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub level: Level,

    /// Producer name
    pub service: String,

    /// Human-readable label
    pub name: String,

    /// Correlation id; the server sends `""` for events outside any trace
    #[serde(
        default,
        deserialize_with = "empty_string_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        level: Level,
        service: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            level,
            service: service.into(),
            name: name.into(),
            trace_id: None,
            data: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_error(&self) -> bool {
        self.level.is_error()
    }

    /// Decode one event from a JSON payload
    pub fn from_json(payload: &str) -> Result<Self, MalformedPayloadError> {
        let event: Event = serde_json::from_str(payload)
            .map_err(|e| MalformedPayloadError::from_json(&e, payload))?;
        event
            .validate()
            .map_err(|reason| MalformedPayloadError::new(reason, payload))?;
        Ok(event)
    }

    /// Decode one entry of an event list, with the same checks as `from_json`
    pub fn from_value(value: serde_json::Value) -> Result<Self, MalformedPayloadError> {
        let payload = value.to_string();
        let event: Event = serde_json::from_value(value)
            .map_err(|e| MalformedPayloadError::from_json(&e, &payload))?;
        event
            .validate()
            .map_err(|reason| MalformedPayloadError::new(reason, &payload))?;
        Ok(event)
    }

    /// Checks serde cannot express
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.service.is_empty() {
            return Err("empty service name");
        }
        Ok(())
    }

    /// First eight characters of the trace id, for compact display
    pub fn short_trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref().map(short_id)
    }
}

/// Shorten an identifier to at most eight characters
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Body of `POST /ingest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub level: Level,
    pub service: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_event() {
        let json = r#"{
            "id": "9b2f",
            "timestamp": "2025-01-10T12:00:00.250Z",
            "level": "error",
            "service": "api",
            "name": "timeout",
            "trace_id": "tr1"
        }"#;
        let event = Event::from_json(json).unwrap();
        assert_eq!(event.id, "9b2f");
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.trace_id.as_deref(), Some("tr1"));
        assert!(event.data.is_none());
        assert_eq!(event.timestamp.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_empty_trace_id_is_absent() {
        let json = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"info","service":"web","name":"GET /","trace_id":""}"#;
        let event = Event::from_json(json).unwrap();
        assert!(event.trace_id.is_none());
        assert!(event.short_trace_id().is_none());

        let json = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"info","service":"web","name":"GET /","trace_id":null}"#;
        assert!(Event::from_json(json).unwrap().trace_id.is_none());
    }

    #[test]
    fn test_data_is_kept() {
        let json = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"warn","service":"db","name":"slow query","data":{"rows":12,"table":"users"}}"#;
        let event = Event::from_json(json).unwrap();
        let data = event.data.unwrap();
        assert_eq!(data["rows"], serde_json::json!(12));
        assert_eq!(data["table"], serde_json::json!("users"));
    }

    #[test]
    fn test_warning_alias() {
        let json = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"warning","service":"db","name":"x"}"#;
        assert_eq!(Event::from_json(json).unwrap().level, Level::Warn);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(Event::from_json("not json").is_err());
        assert!(Event::from_json(r#"{"id":"a"}"#).is_err());
        let unknown_level = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"fatal","service":"db","name":"x"}"#;
        assert!(Event::from_json(unknown_level).is_err());
        let empty_service = r#"{"id":"a","timestamp":"2025-01-10T12:00:00Z","level":"info","service":"","name":"x"}"#;
        let err = Event::from_json(empty_service).unwrap_err();
        assert_eq!(err.reason, "empty service name");
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert!("debug".parse::<Level>().is_err());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_ingest_request_omits_missing_trace() {
        let req = IngestRequest {
            level: Level::Info,
            service: "web".to_string(),
            name: "GET /".to_string(),
            trace_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"level": "info", "service": "web", "name": "GET /"})
        );
    }
}
