//! Event-stream decoder for the chat stream endpoint.
//!
//! The response body is a sequence of blocks separated by a blank line:
//!
//! ```text
//! data: {"content": "Hel"}
//!
//! event: error
//! data: {"error": "rate limited"}
//! ```
//!
//! Network reads may split a block anywhere, so undelimited bytes are held
//! until the delimiter (or end of body) arrives. A `data:` block that fails
//! to parse is logged and skipped; an `error` block ends decoding.

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::EngineError;

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, EngineError>>;

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One fragment of assistant text.
    Content(String),
    /// Server-reported failure. Terminal.
    Error(String),
    /// Body ended without an error block. Terminal.
    Completed,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Content(_))
    }
}

#[derive(Deserialize)]
struct ContentPayload {
    content: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: String,
}

/// Incremental block decoder. Feed it chunks, then call [`finish`] once the
/// body ends.
///
/// [`finish`]: StreamDecoder::finish
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a delimiter.
    scanned: usize,
    /// An `event: error` block arrived without its data line.
    error_pending: bool,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode every complete block in `chunk` plus previously buffered bytes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        // CRLF framing is folded to LF; JSON payloads never carry a raw CR.
        self.buffer
            .extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        while let Some(end) = self.next_delimiter() {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.scanned = 0;
            if let Some(event) = self.decode_block(&block[..end]) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flush trailing bytes and emit the terminal event for a body that
    /// simply ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.buffer);
        if let Some(event) = self.decode_block(&rest) {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
        if self.error_pending {
            events.push(StreamEvent::Error("stream ended inside an error event".into()));
        } else {
            events.push(StreamEvent::Completed);
        }
        events
    }

    fn next_delimiter(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(1);
        match self.buffer[start..].windows(2).position(|w| w == b"\n\n") {
            Some(pos) => Some(start + pos),
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    fn decode_block(&mut self, block: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(block);
        let mut event_type: Option<&str> = None;
        let mut data: Option<String> = None;

        for line in text.lines() {
            if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("data:") {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                }
            }
            // id:, retry: and comment lines carry nothing for us
        }

        if event_type == Some("error") || self.error_pending {
            let Some(data) = data else {
                self.error_pending = true;
                return None;
            };
            self.error_pending = false;
            let message = serde_json::from_str::<ErrorPayload>(&data)
                .map(|payload| payload.error)
                .unwrap_or(data);
            return Some(StreamEvent::Error(message));
        }

        if let Some(other) = event_type.filter(|t| *t != "message") {
            debug!(event = other, "ignoring unknown stream event");
            return None;
        }

        let data = data?;
        match serde_json::from_str::<ContentPayload>(&data) {
            Ok(payload) => Some(StreamEvent::Content(payload.content)),
            Err(e) => {
                let err = EngineError::MalformedFragment(e.to_string());
                warn!(error = %err, fragment = %truncate(&data, 120), "skipping stream fragment");
                None
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

struct DecodeState {
    bytes: ByteStream,
    decoder: StreamDecoder,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

/// Decode a body lazily. The sequence ends after the first terminal event
/// or the first read error; bytes after an error block are never read.
pub fn decode_stream(bytes: ByteStream) -> impl Stream<Item = Result<StreamEvent, EngineError>> + Send {
    let state = DecodeState {
        bytes,
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.decoder.feed(&chunk));
                    state.done = state.decoder.is_finished();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.pending.extend(state.decoder.finish());
                    state.done = true;
                }
            }
        }
    })
}
