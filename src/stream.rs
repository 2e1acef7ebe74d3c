//! Server-Sent Events framing for the chat endpoint.
//!
//! The endpoint sends `data: <payload>` frames separated by blank lines and
//! closes with a `data: [DONE]` frame. Fragments from the transport can split
//! a frame anywhere, including inside a multi-byte character, so framing works
//! on raw bytes and only decodes complete events.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};

use crate::error::ChatResult;

/// Separates events in the stream.
const EVENT_DELIMITER: &[u8] = b"\n\n";

/// End-of-stream sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Characters after which a delta is appended without a joining space.
const CLOSING_PUNCTUATION: [char; 7] = ['.', ',', '!', '?', ':', ';', '-'];

/// One logical event decoded from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text fragment of the assistant's reply.
    Delta(String),
    /// The sentinel was received; nothing follows.
    Done,
    /// The server reported an error, or an event could not be decoded.
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

/// Appends `incoming` to `existing`, inserting a single space unless the text
/// is already separated.
///
/// No space is inserted when `existing` is empty, ends in whitespace or one of
/// `. , ! ? : ; -`, or when `incoming` starts with whitespace.
pub fn join(existing: &str, incoming: &str) -> String {
    let mut out = String::with_capacity(existing.len() + incoming.len() + 1);
    out.push_str(existing);
    join_into(&mut out, incoming);
    out
}

/// In-place form of [`join`].
pub fn join_into(existing: &mut String, incoming: &str) {
    if incoming.is_empty() {
        return;
    }
    if needs_space(existing, incoming) {
        existing.push(' ');
    }
    existing.push_str(incoming);
}

fn needs_space(existing: &str, incoming: &str) -> bool {
    let Some(last) = existing.chars().last() else {
        return false;
    };
    if last.is_whitespace() || CLOSING_PUNCTUATION.contains(&last) {
        return false;
    }
    !incoming.starts_with(char::is_whitespace)
}

/// Incremental SSE framer.
///
/// Holds the bytes of an unterminated event between fragments. After the
/// sentinel or an error event the framer is finished and ignores all input.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: Vec<u8>,
    finished: bool,
    events: usize,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of events produced so far.
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Feeds one transport fragment and returns the events it completed, in order.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            if !fragment.is_empty() {
                log::debug!("Discarding {} bytes received after end of stream", fragment.len());
            }
            return Vec::new();
        }

        self.buffer.extend_from_slice(fragment);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = find_delimiter(&self.buffer[consumed..]) {
            let end = consumed + pos;
            let event = parse_event(&self.buffer[consumed..end]);
            consumed = end + EVENT_DELIMITER.len();

            if let Some(event) = event {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    break;
                }
            }
        }

        if self.finished {
            if consumed < self.buffer.len() {
                log::debug!(
                    "Discarding {} buffered bytes after end of stream",
                    self.buffer.len() - consumed
                );
            }
            self.buffer.clear();
        } else {
            self.buffer.drain(..consumed);
        }

        self.events += events.len();
        events
    }

    /// Called when the transport ends. Returns true if an unterminated event
    /// was dropped.
    pub fn finish(&mut self) -> bool {
        let dropped = !self.finished && !self.buffer.iter().all(u8::is_ascii_whitespace);
        if dropped {
            log::debug!(
                "Stream ended with {} bytes of unterminated event, dropping",
                self.buffer.len()
            );
        }
        self.buffer.clear();
        self.finished = true;
        dropped
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(EVENT_DELIMITER.len())
        .position(|window| window == EVENT_DELIMITER)
}

/// Decodes one complete event. Events that do not start with `data:` produce nothing.
fn parse_event(raw: &[u8]) -> Option<StreamEvent> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => return Some(StreamEvent::Error(format!("Invalid UTF-8 in event: {}", e))),
    };

    // An optional leading `event:` line names the event; only `error` is special
    let (is_error, body) = match text.strip_prefix("event:") {
        Some(rest) => {
            let (name, body) = rest.split_once('\n').unwrap_or((rest, ""));
            (name.trim() == "error", body)
        }
        None => (false, text),
    };

    // Tokens are sent unescaped, so everything after the prefix is payload,
    // embedded newlines included
    let payload = body.strip_prefix("data:")?.trim();
    if is_error {
        return Some(StreamEvent::Error(payload.to_string()));
    }
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }
    Some(StreamEvent::Delta(payload.to_string()))
}

struct FrameState<S> {
    bytes: S,
    framer: SseFramer,
    pending: VecDeque<StreamEvent>,
    ended: bool,
}

/// Lazily decodes a transport byte stream into events.
///
/// The sequence ends after `Done`, after the first error (event or transport),
/// or when the transport ends. It cannot be restarted.
pub fn sse_events<S>(bytes: S) -> impl Stream<Item = ChatResult<StreamEvent>> + Send
where
    S: Stream<Item = ChatResult<Bytes>> + Send + Unpin + 'static,
{
    let state = FrameState {
        bytes,
        framer: SseFramer::new(),
        pending: VecDeque::new(),
        ended: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.ended = true;
                    state.pending.clear();
                }
                return Some((Ok(event), state));
            }
            if state.ended {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    log::debug!("SSE fragment received: {} bytes", chunk.len());
                    let events = state.framer.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.ended = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.framer.finish();
                    log::debug!("Transport ended after {} events", state.framer.event_count());
                    return None;
                }
            }
        }
    })
}
