//! Read-only aggregate views served by the query API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `GET /api/services`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub error_count: u64,
    pub last_activity: DateTime<Utc>,
    pub event_count: u64,
}

/// `GET /api/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_events: u64,
    /// Percentage of error-level events
    pub error_rate: f64,
    pub active_services: u64,
}

/// One row of `GET /api/errors-by-service`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorByService {
    pub service: String,
    pub count: u64,
}

/// One hourly bucket of `GET /api/throughput`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughputPoint {
    /// Bucket label, e.g. `"14:00"`
    pub time: String,
    pub events: u64,
}

/// One row of `GET /api/traces`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub id: String,
    pub name: String,
    pub service: String,
    /// Milliseconds
    pub duration: u64,
    pub spans: u64,
    pub timestamp: DateTime<Utc>,
    pub has_error: bool,
}

/// `GET /api/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub demo_enabled: bool,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let json = r#"[{"name":"web","error_count":2,"last_activity":"2025-01-10T12:00:00Z","event_count":1200}]"#;
        let services: Vec<ServiceInfo> = serde_json::from_str(json).unwrap();
        assert_eq!(services[0].name, "web");
        assert_eq!(services[0].error_count, 2);
        assert_eq!(services[0].event_count, 1200);
    }

    #[test]
    fn test_parse_stats_and_status() {
        let stats: Stats =
            serde_json::from_str(r#"{"total_events":2600,"error_rate":0.5,"active_services":3}"#)
                .unwrap();
        assert_eq!(stats.total_events, 2600);
        assert_eq!(stats.active_services, 3);

        let status: ServerStatus =
            serde_json::from_str(r#"{"demo_enabled":true,"version":"1.0.0"}"#).unwrap();
        assert!(status.demo_enabled);
    }

    #[test]
    fn test_parse_trace_summary() {
        let json = r#"{"id":"trace-1","name":"HTTP Request","service":"web","duration":150,"spans":3,"timestamp":"2025-01-10T12:00:00Z","has_error":false}"#;
        let summary: TraceSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.spans, 3);
        assert!(!summary.has_error);
    }
}
