//! Incremental parser for the backend's server-sent-event stream.
//!
//! Chunks arrive with no alignment guarantees: a frame, a line, or even a
//! multi-byte UTF-8 sequence may be split across reads. The parser keeps the
//! unterminated tail of the byte stream and only decodes complete lines (a
//! `\n` byte never occurs inside a multi-byte sequence, so line boundaries are
//! safe decode points).
//!
//! Frames look like:
//!
//! ```text
//! event: token
//! data: "Hallo"
//!
//! ```
//!
//! A blank line dispatches the accumulated `(event, data)` pair. Repeated
//! `data:` lines are joined with `\n`. Comments (`:`), `id:` and `retry:` are
//! ignored, as are unknown event types.

use tracing::{debug, trace, warn};

use crate::types::StreamMetadata;

/// A typed frame of the answer stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metadata(StreamMetadata),
    Token(String),
    Done,
}

/// Chunk-boundary-safe SSE parser.
///
/// Feed it with [`SseParser::feed`] for every network chunk and call
/// [`SseParser::finish`] once the body ends.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: String,
    data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk and returns the events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes whatever is left at end of stream: a trailing line without a
    /// newline, then a pending frame without its closing blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.buffer.is_empty() {
            let mut rest = std::mem::take(&mut self.buffer);
            if rest.last() == Some(&b'\r') {
                rest.pop();
            }
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if let Some(event) = self.dispatch() {
            trace!("flushed pending frame at end of stream");
            events.push(event);
        }
        events
    }

    /// `true` if nothing is buffered or accumulated.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.event_type.is_empty() && self.data.is_none()
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = value.trim().to_string(),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            // id, retry and unknown fields carry nothing for this protocol
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let event_type = std::mem::take(&mut self.event_type);
        let data = self.data.take();

        if event_type.is_empty() && data.is_none() {
            return None;
        }
        let data = data.unwrap_or_default();

        match event_type.as_str() {
            "metadata" => match serde_json::from_str::<StreamMetadata>(&data) {
                Ok(metadata) => Some(StreamEvent::Metadata(metadata)),
                Err(e) => {
                    warn!(error = %e, len = data.len(), "dropping unparsable metadata frame");
                    None
                }
            },
            "token" => {
                let token = serde_json::from_str::<String>(&data).unwrap_or(data);
                Some(StreamEvent::Token(token))
            }
            "done" => Some(StreamEvent::Done),
            other => {
                debug!(event = other, "ignoring unknown event type");
                None
            }
        }
    }
}
