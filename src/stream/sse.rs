//! SSE (Server-Sent Events) frame parser, encoder, and stream utilities.
//!
//! Handles the low-level parsing of SSE frames from a byte stream,
//! including buffering partial lines and handling field semantics per the
//! [WHATWG event-stream format](https://html.spec.whatwg.org/multipage/server-sent-events.html).

use super::SseEvent;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

const DONE_FRAME: &str = "data: [DONE]\n\n";

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser: incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` lines append to the data buffer, joined with `\n`
    /// - an empty line dispatches the frame
    /// - `:` comment lines and unknown fields are ignored
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// End of input: dispatch a trailing frame that was never terminated by
    /// a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let mut out = Vec::new();
        if self.read_offset < self.buffer.len() {
            let rest = std::mem::take(&mut self.buffer);
            let line = rest[self.read_offset..].trim_end_matches('\r');
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut out,
            );
            self.read_offset = 0;
        }
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            &mut self.last_event_id,
            &mut out,
        );
        out.pop()
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *last_event_id = Some(value.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Encode an [`SseEvent`] back into SSE wire text.
#[must_use]
pub fn encode_sse_event(event: &SseEvent) -> String {
    // Fast path for the dominant shape: unnamed, single-line `data` event.
    if event.event.is_none() && event.id.is_none() && !event.data.contains('\n') {
        return openai_sse_frame(&event.data);
    }

    let mut out = String::with_capacity(16 + event.data.len());
    if let Some(ev) = event.event.as_deref() {
        out.push_str("event: ");
        out.push_str(ev);
        out.push('\n');
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    if let Some(id) = event.id.as_deref() {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Check if an [`SseEvent`] is a terminal `[DONE]` event.
#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == "[DONE]"
}

/// Format a `[DONE]` frame as SSE text.
#[must_use]
pub fn done_frame() -> String {
    DONE_FRAME.to_owned()
}

/// Format an OpenAI-style SSE frame (no event type, just data).
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Append the decodable prefix of `remainder ++ bytes` to `out`, keeping an
/// incomplete trailing UTF-8 sequence in `remainder` for the next chunk.
/// Invalid sequences are replaced with U+FFFD.
fn decode_utf8_chunk(remainder: &mut Vec<u8>, bytes: &[u8], out: &mut String) {
    remainder.extend_from_slice(bytes);
    let mut start = 0;
    loop {
        match std::str::from_utf8(&remainder[start..]) {
            Ok(text) => {
                out.push_str(text);
                remainder.clear();
                return;
            }
            Err(err) => {
                let valid_up_to = start + err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&remainder[start..valid_up_to]));
                match err.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start = valid_up_to + len;
                    }
                    None => {
                        remainder.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Bytes arriving from an HTTP response body are decoded as UTF-8, fed into
/// the parser, and complete [`SseEvent`] frames are yielded. A trailing frame
/// without a terminating blank line is still yielded at end of input. A body
/// error is yielded once and ends the stream.
pub fn sse_event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseParser,
        remainder: Vec<u8>,
        text: String,
        parsed: Vec<SseEvent>,
        pending: PendingEvents,
        ended: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        text: String::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        ended: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.ended {
                return None;
            }

            match st.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    st.text.clear();
                    decode_utf8_chunk(&mut st.remainder, &bytes, &mut st.text);
                    st.parser.feed_into(&st.text, &mut st.parsed);
                    st.pending.extend_from_vec(&mut st.parsed);
                }
                Some(Err(err)) => {
                    st.ended = true;
                    return Some((Err(err), st));
                }
                None => {
                    st.ended = true;
                    if !st.remainder.is_empty() {
                        let tail = String::from_utf8_lossy(&st.remainder).into_owned();
                        st.remainder.clear();
                        st.parser.feed_into(&tail, &mut st.parsed);
                        st.pending.extend_from_vec(&mut st.parsed);
                    }
                    if let Some(event) = st.parser.finish() {
                        st.parsed.push(event);
                        st.pending.extend_from_vec(&mut st.parsed);
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
