//! `text/event-stream` decoding and the reqwest-backed event source.
//!
//! Frames are separated by blank lines. Lines end with `\r\n`, `\n` or a bare
//! `\r`. `data:` lines are joined with `\n`, `event:` names the frame, lines
//! starting with `:` are comments and act as keep-alives. Chunk boundaries
//! may fall anywhere, including inside a UTF-8 sequence or between the `\r`
//! and `\n` of one line ending; an unterminated frame at end of stream is
//! discarded. A single line longer than [`MAX_LINE_BYTES`] fails the stream.

use std::collections::VecDeque;
use std::fmt::Display;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{EventSource, EventStream, TransportError};
use crate::domain::{Inbound, RawEvent};

/// Longest line the decoder will buffer while waiting for its end
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched event-stream frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if any
    pub event: Option<String>,

    /// Joined `data:` lines
    pub data: String,

    /// `id:` field, if any
    pub id: Option<String>,
}

/// Output of the line decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(SseFrame),
    Comment(String),
}

/// Incremental event-stream decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, unterminated line
    buffer: Vec<u8>,
    /// Previous line ended in `\r`; a leading `\n` belongs to it
    skip_lf: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns whatever frames and comments it completed.
    ///
    /// Only the new bytes are scanned. Fails once the pending line grows
    /// past [`MAX_LINE_BYTES`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, TransportError> {
        let mut out = Vec::new();

        for &byte in chunk {
            if std::mem::take(&mut self.skip_lf) && byte == b'\n' {
                continue;
            }

            if byte == b'\r' || byte == b'\n' {
                self.skip_lf = byte == b'\r';
                let line = String::from_utf8_lossy(&self.buffer).into_owned();
                self.buffer.clear();
                if let Some(decoded) = self.process_line(&line) {
                    out.push(decoded);
                }
                continue;
            }

            if self.buffer.len() >= MAX_LINE_BYTES {
                return Err(TransportError::Stream(format!(
                    "event stream line exceeds {} bytes",
                    MAX_LINE_BYTES
                )));
            }
            self.buffer.push(byte);
        }

        Ok(out)
    }

    fn process_line(&mut self, line: &str) -> Option<Decoded> {
        if line.is_empty() {
            return self.dispatch();
        }

        if let Some(comment) = line.strip_prefix(':') {
            return Some(Decoded::Comment(comment.trim_start().to_string()));
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry and unknown fields are ignored
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Decoded> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(Decoded::Frame(SseFrame { event, data, id }))
    }
}

/// Turn a frame into a raw event; malformed frames are skipped
pub fn frame_to_event(frame: &SseFrame) -> Option<RawEvent> {
    let mut value: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Skipping event frame with invalid JSON");
            return None;
        }
    };

    // Fall back to the SSE event name when the payload has no discriminator
    if let (Some(name), Value::Object(map)) = (frame.event.as_deref(), &mut value) {
        if !map.contains_key("type") {
            map.insert("type".to_string(), Value::String(name.to_string()));
        }
    }

    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Skipping event frame with unexpected shape");
            None
        }
    }
}

/// Decode a stream of byte chunks into inbound events
pub fn decode_event_stream<S, B, E>(chunks: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (
        Box::pin(chunks),
        SseDecoder::new(),
        VecDeque::<Inbound>::new(),
        false,
    );

    stream::unfold(state, |(mut chunks, mut decoder, mut pending, failed)| async move {
        if failed {
            return None;
        }
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((Ok(item), (chunks, decoder, pending, false)));
            }

            match chunks.next().await {
                Some(Ok(bytes)) => {
                    let decoded = match decoder.feed(bytes.as_ref()) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            warn!(error = %e, "Abandoning event stream");
                            return Some((Err(e), (chunks, decoder, pending, true)));
                        }
                    };
                    for item in decoded {
                        match item {
                            Decoded::Frame(frame) => {
                                if let Some(event) = frame_to_event(&frame) {
                                    pending.push_back(Inbound::Event(event));
                                }
                            }
                            Decoded::Comment(_) => pending.push_back(Inbound::KeepAlive),
                        }
                    }
                }
                Some(Err(e)) => {
                    let err = TransportError::Stream(e.to_string());
                    return Some((Err(err), (chunks, decoder, pending, true)));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Event source over HTTP using reqwest
pub struct SseEventSource {
    client: reqwest::Client,
}

impl Default for SseEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SseEventSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self, endpoint: Url) -> Result<EventStream, TransportError> {
        debug!(url = %super::http::redact(&endpoint), "Opening event stream");

        // Errors are stripped of the URL: it carries the token
        let response = self
            .client
            .get(endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let chunks = response.bytes_stream().map(|r| r.map_err(|e| e.without_url()));
        Ok(decode_event_stream(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    fn frames(decoded: Vec<Decoded>) -> Vec<SseFrame> {
        decoded
            .into_iter()
            .filter_map(|d| match d {
                Decoded::Frame(f) => Some(f),
                Decoded::Comment(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let out = frames(decoder.feed(b"data: {\"type\":\"connected\"}\n\n").unwrap());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "{\"type\":\"connected\"}");
        assert_eq!(out[0].event, None);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: log\nda").unwrap().is_empty());
        assert!(decoder.feed(b"ta: hel").unwrap().is_empty());

        let out = frames(decoder.feed(b"lo\n\n").unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event.as_deref(), Some("log"));
        assert_eq!(out[0].data, "hello");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: café\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        assert!(decoder.feed(&bytes[..split]).unwrap().is_empty());
        let out = frames(decoder.feed(&bytes[split..]).unwrap());
        assert_eq!(out[0].data, "café");
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let out = frames(decoder.feed(b"data: line one\r\ndata:line two\r\nid: 7\r\n\r\n").unwrap());

        assert_eq!(out[0].data, "line one\nline two");
        assert_eq!(out[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_comment_is_reported_and_blank_frames_skipped() {
        let mut decoder = SseDecoder::new();
        let out = decoder.feed(b": ping\n\nevent: noop\n\n").unwrap();

        assert_eq!(out, vec![Decoded::Comment("ping".to_string())]);
    }

    #[test]
    fn test_frame_to_event_uses_event_name_as_fallback() {
        let frame = SseFrame {
            event: Some("error".to_string()),
            data: r#"{"error":"LLM quota exceeded"}"#.to_string(),
            id: None,
        };
        let event = frame_to_event(&frame).unwrap();

        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.error.as_deref(), Some("LLM quota exceeded"));
    }

    #[test]
    fn test_payload_type_wins_over_event_name() {
        let frame = SseFrame {
            event: Some("message".to_string()),
            data: r#"{"type":"log","message":"Execution plan ready"}"#.to_string(),
            id: None,
        };
        assert_eq!(frame_to_event(&frame).unwrap().kind, EventKind::Log);
    }

    #[test]
    fn test_invalid_json_is_skipped() {
        let frame = SseFrame {
            data: "not json".to_string(),
            ..Default::default()
        };
        assert!(frame_to_event(&frame).is_none());
    }

    #[test]
    fn test_bare_carriage_return_ends_lines() {
        let mut decoder = SseDecoder::new();
        let out = frames(decoder.feed(b"data: {\"type\":\"log\"}\r\r").unwrap());

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "{\"type\":\"log\"}");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: a\r").unwrap().is_empty());
        // The \n completes the previous line ending, not a blank line
        assert!(decoder.feed(b"\ndata: b\r").unwrap().is_empty());

        let out = frames(decoder.feed(b"\n\r\n").unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "a\nb");
    }

    #[test]
    fn test_oversized_line_fails() {
        let mut decoder = SseDecoder::new();
        let half = vec![b'x'; MAX_LINE_BYTES / 2];

        assert!(decoder.feed(b"data: ").unwrap().is_empty());
        assert!(decoder.feed(&half).unwrap().is_empty());
        assert!(matches!(
            decoder.feed(&half),
            Err(TransportError::Stream(_))
        ));
    }

    #[test]
    fn test_long_line_within_limit_is_kept() {
        let mut decoder = SseDecoder::new();
        let body = "y".repeat(MAX_LINE_BYTES - 16);

        decoder.feed(b"data: ").unwrap();
        for part in body.as_bytes().chunks(4096) {
            assert!(decoder.feed(part).unwrap().is_empty());
        }

        let out = frames(decoder.feed(b"\n\n").unwrap());
        assert_eq!(out[0].data.len(), body.len());
    }
}
