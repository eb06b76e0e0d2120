//! HTTP client for the Scopion query API
//!
//! Handles every request/response call: the snapshot and trace reads the
//! feed depends on, the aggregate views, and event ingestion.

use crate::error::{transport_error, ClientError, ClientResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scopion_core::{
    ClientSettings, ErrorByService, Event, IngestRequest, MalformedPayloadError, QueryError,
    QueryResult, ServerStatus, ServiceInfo, SnapshotSource, Stats, ThroughputPoint, TraceSource,
    TraceSummary, TransportError,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, warn};

/// User agent sent with every request
pub(crate) fn user_agent() -> String {
    format!("scopion/{}", env!("CARGO_PKG_VERSION"))
}

/// Strip a trailing slash after checking the URL can carry API paths
pub(crate) fn normalize_base_url(base_url: &str) -> ClientResult<String> {
    let url = url::Url::parse(base_url)?;
    if url.cannot_be_a_base() {
        return Err(ClientError::UnsupportedUrl(base_url.to_string()));
    }
    Ok(base_url.trim_end_matches('/').to_string())
}

/// HTTP client for the Scopion API
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration, connect_timeout: Duration) -> ClientResult<Self> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(user_agent())
            .gzip(true)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        Self::new(
            &settings.server_url,
            settings.request_timeout(),
            settings.connect_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Most recent events, newest first
    pub async fn recent_events(&self, limit: usize) -> QueryResult<Vec<Event>> {
        self.get_events("/api/events", &[("limit", limit.to_string())])
            .await
    }

    /// Events of one trace
    pub async fn events_for_trace(&self, trace_id: &str) -> QueryResult<Vec<Event>> {
        self.get_events("/api/trace-events", &[("trace_id", trace_id.to_string())])
            .await
    }

    pub async fn services(&self) -> QueryResult<Vec<ServiceInfo>> {
        self.get_list("/api/services", &[]).await
    }

    pub async fn stats(&self) -> QueryResult<Stats> {
        self.get_json("/api/stats", &[]).await
    }

    /// Error counts per service over the last `hours`
    pub async fn errors_by_service(&self, hours: u32) -> QueryResult<Vec<ErrorByService>> {
        self.get_list("/api/errors-by-service", &[("hours", hours.to_string())])
            .await
    }

    /// Hourly event counts over the last `hours`
    pub async fn throughput(&self, hours: u32) -> QueryResult<Vec<ThroughputPoint>> {
        self.get_list("/api/throughput", &[("hours", hours.to_string())])
            .await
    }

    pub async fn traces(&self, limit: usize) -> QueryResult<Vec<TraceSummary>> {
        self.get_list("/api/traces", &[("limit", limit.to_string())])
            .await
    }

    /// Full-text search; a blank query matches nothing and sends no request
    pub async fn search(&self, query: &str) -> QueryResult<Vec<Event>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.get_events("/api/search", &[("q", query.to_string())])
            .await
    }

    pub async fn status(&self) -> QueryResult<ServerStatus> {
        self.get_json("/api/status", &[]).await
    }

    /// Submit one event; the server assigns its id and timestamp
    pub async fn ingest(&self, request: &IngestRequest) -> QueryResult<()> {
        let url = format!("{}/ingest", self.base_url);

        debug!("Ingesting {} event for {}", request.level, request.service);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(self.status_error(status, response).await.into())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> QueryResult<T> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body)
            .map_err(|e| MalformedPayloadError::from_json(&e, &body).into())
    }

    /// List endpoints may answer `null` for an empty result
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> QueryResult<Vec<T>> {
        let list: Option<Vec<T>> = self.get_json(path, query).await?;
        Ok(list.unwrap_or_default())
    }

    /// Event lists drop (and log) entries that fail to decode or validate
    async fn get_events(&self, path: &str, query: &[(&str, String)]) -> QueryResult<Vec<Event>> {
        let entries: Vec<serde_json::Value> = self.get_list(path, query).await?;
        let total = entries.len();

        let events: Vec<Event> = entries
            .into_iter()
            .filter_map(|entry| match Event::from_value(entry) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping event from {}: {}", path, e);
                    None
                }
            })
            .collect();

        if events.len() < total {
            debug!("{} of {} events dropped from {}", total - events.len(), total, path);
        }
        Ok(events)
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> QueryResult<String> {
        let url = format!("{}{}", self.base_url, path);

        debug!("GET {}", path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        self.handle_response(response).await
    }

    /// Generic response handler
    async fn handle_response(&self, response: reqwest::Response) -> QueryResult<String> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| QueryError::from(transport_error(&e)))?;
            return Ok(body);
        }

        Err(self.status_error(status, response).await.into())
    }

    async fn status_error(&self, status: StatusCode, response: reqwest::Response) -> TransportError {
        let message = self.parse_error(status, response).await;
        if status.is_server_error() {
            error!("Server error {}: {}", status, message);
        }
        TransportError::status(status.as_u16(), message)
    }

    async fn parse_error(&self, status: StatusCode, response: reqwest::Response) -> String {
        let body = response.text().await.unwrap_or_default();
        let body = body.trim();

        // {"error": "..."} bodies carry the message in a field
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(message) = value.get("error").and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }

        if body.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        } else {
            body.to_string()
        }
    }
}

#[async_trait]
impl SnapshotSource for ApiClient {
    async fn fetch_recent(&self, limit: usize) -> QueryResult<Vec<Event>> {
        self.recent_events(limit).await
    }
}

#[async_trait]
impl TraceSource for ApiClient {
    async fn trace_events(&self, trace_id: &str) -> QueryResult<Vec<Event>> {
        self.events_for_trace(trace_id).await
    }
}
