//! Live push channel over Server-Sent Events
//!
//! `GET /api/live` streams one JSON event per SSE message. The connection is
//! never retried here; a failed subscription reports once and ends.

use crate::error::{channel_error, ClientResult};
use crate::http::{normalize_base_url, user_agent};
use crate::sse::SseParser;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client;
use scopion_core::{ChannelError, ClientSettings, Event, LiveSource, LiveSubscription};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Opens SSE subscriptions against one server
#[derive(Debug, Clone)]
pub struct LiveChannel {
    client: Client,
    url: String,
    open_timeout: Duration,
}

impl LiveChannel {
    /// Create a live channel
    ///
    /// The stream itself has no timeout; `open_timeout` bounds connecting and
    /// receiving the response headers.
    pub fn new(base_url: &str, open_timeout: Duration) -> ClientResult<Self> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .connect_timeout(open_timeout)
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/api/live", base_url),
            open_timeout,
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        Self::new(&settings.server_url, settings.connect_timeout())
    }

    /// Open a subscription
    pub async fn subscribe(&self) -> Result<SseSubscription, ChannelError> {
        debug!("Opening live channel {}", self.url);

        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send();

        let response = tokio::time::timeout(self.open_timeout, request)
            .await
            .map_err(|_| {
                ChannelError::Connect(format!("no response within {:?}", self.open_timeout))
            })?
            .map_err(|e| channel_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Live channel refused with status {}", status);
            return Err(ChannelError::Status(status.as_u16()));
        }

        info!("Live channel connected to {}", self.url);

        let stream = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(SseSubscription::new(Box::pin(stream)))
    }
}

#[async_trait]
impl LiveSource for LiveChannel {
    async fn open(&self) -> Result<Box<dyn LiveSubscription>, ChannelError> {
        Ok(Box::new(self.subscribe().await?))
    }
}

/// An open SSE connection decoded into events
pub struct SseSubscription {
    stream: Option<ByteStream>,
    parser: SseParser,
    pending: VecDeque<Event>,
    failure: Option<ChannelError>,
    dropped: u64,
}

impl SseSubscription {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
            parser: SseParser::new(),
            pending: VecDeque::new(),
            failure: None,
            dropped: 0,
        }
    }

    /// Decode the complete messages in `chunk`; an oversized line fails the stream
    fn decode_chunk(&mut self, chunk: &[u8]) -> Result<(), ChannelError> {
        let fed = self.parser.feed(chunk);

        for message in self.parser.take_events() {
            match Event::from_json(&message.data) {
                Ok(event) => self.pending.push_back(event),
                Err(e) => {
                    self.dropped += 1;
                    warn!("Dropping live message: {} [{}]", e, e.excerpt);
                }
            }
        }

        fed.map_err(|e| ChannelError::Stream(e.to_string()))
    }
}

#[async_trait]
impl LiveSubscription for SseSubscription {
    async fn next_event(&mut self) -> Option<Result<Event, ChannelError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            // reported once the events decoded before it are delivered
            if let Some(e) = self.failure.take() {
                return Some(Err(e));
            }

            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = self.decode_chunk(&chunk) {
                        warn!("Live stream failed: {}", e);
                        self.stream = None;
                        self.failure = Some(e);
                    }
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Some(Err(channel_error(&e)));
                }
                None => {
                    debug!("Live stream closed by server");
                    self.stream = None;
                    return Some(Err(ChannelError::Ended));
                }
            }
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Live subscription closed");
        }
        self.pending.clear();
        self.failure = None;
    }

    fn dropped(&self) -> u64 {
        self.dropped
    }
}
