//! Server-Sent Events (SSE) parsing
//!
//! Bytes are buffered until a full line is available, so messages split
//! across network chunks (even inside a UTF-8 sequence) parse the same as
//! messages that arrive whole. A line longer than the parser's limit is an
//! error rather than an ever-growing buffer.

use thiserror::Error;

/// Longest line buffered before the stream is rejected
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A line grew past the parser's limit without a newline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SSE line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// A single SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

/// Incremental SSE parser for a `text/event-stream` body
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    max_line: usize,
    data_lines: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    events: Vec<SseEvent>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            data_lines: Vec::new(),
            event: None,
            id: None,
            retry: None,
            events: Vec::new(),
        }
    }

    /// Add data to the parser
    ///
    /// On [`LineTooLong`] the partial line and event are discarded; events
    /// completed before it stay available from `take_events`.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), LineTooLong> {
        self.buffer.extend_from_slice(data);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos > self.max_line {
                return Err(self.overflow());
            }
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line);
        }

        if self.buffer.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(())
    }

    fn overflow(&mut self) -> LineTooLong {
        self.buffer.clear();
        self.data_lines.clear();
        self.event = None;
        self.id = None;
        self.retry = None;
        LineTooLong {
            limit: self.max_line,
        }
    }

    /// Take all parsed events
    pub fn take_events(&mut self) -> Vec<SseEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bytes held back waiting for the end of a line
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) {
        // blank line dispatches the event
        if line.is_empty() {
            self.dispatch();
            return;
        }

        // keep-alive / comment
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.trim().parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();

        if self.data_lines.is_empty() {
            return;
        }

        self.events.push(SseEvent {
            event,
            data: self.data_lines.join("\n"),
            id,
            retry,
        });
        self.data_lines.clear();
    }
}
