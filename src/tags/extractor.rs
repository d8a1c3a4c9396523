use std::borrow::Cow;

use memchr::{memchr, memmem};

use super::catalog::{match_open_at, partial_suffix_len, OpenMatch, TagDefinition, TagKind};

// Incremental tag extractor.
//
// Consumes model output one fragment at a time and classifies every byte as
// literal text, reasoning payload or tool-call payload. Undecided bytes (a
// possible delimiter prefix at the end of a fragment) are held in a lookahead
// buffer that never exceeds the longest delimiter length, so the cost of each
// `ingest` is proportional to the fragment, not to the response so far.

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Extractor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorMode {
    /// Plain text; nothing held back.
    Text,
    /// The lookahead holds a proper prefix of an open delimiter.
    PendingOpen,
    InReasoning,
    InToolCall,
}

/// Event produced by [`TagExtractor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    /// Visible text outside any recognized tag.
    Literal(String),
    /// A `<think>` region closed; carries its full payload.
    ReasoningComplete(String),
    /// A `<tool_call>` region opened.
    ToolCallStart(usize),
    /// Newly disclosed payload text of the open tool call. Chunks of one call
    /// concatenate to the payload carried by its `ToolCallEnd`.
    ToolArgumentChunk(usize, String),
    /// A `<tool_call>` region closed; carries its full raw payload.
    ToolCallEnd(usize, String),
}

/// Limits applied while a tag is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorLimits {
    /// Payload size at which an open tag degrades to literal text.
    pub max_payload_bytes: usize,
}

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 512 * 1024;

impl Default for ExtractorLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Streaming state machine separating tagged regions from literal text.
///
/// One instance serves exactly one model response.
#[derive(Debug)]
pub struct TagExtractor {
    mode: ExtractorMode,
    lookahead: String,
    payload: String,
    next_tool_index: usize,
    open_tool_index: usize,
    /// The open tag overflowed: its remaining payload and close delimiter
    /// pass through as literal text.
    overflowed: bool,
    limits: ExtractorLimits,
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TagExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ExtractorLimits::default())
    }

    #[must_use]
    pub fn with_limits(limits: ExtractorLimits) -> Self {
        Self {
            mode: ExtractorMode::Text,
            lookahead: String::new(),
            payload: String::new(),
            next_tool_index: 0,
            open_tool_index: 0,
            overflowed: false,
            limits,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ExtractorMode {
        self.mode
    }

    /// True when nothing is buffered and no tag is open.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.mode == ExtractorMode::Text && self.lookahead.is_empty()
    }

    // -- public API ---------------------------------------------------------

    /// Ingest one fragment and return the events it completes.
    pub fn ingest(&mut self, fragment: &str) -> Vec<TagEvent> {
        let mut out = Vec::new();
        self.ingest_into(fragment, &mut out);
        out
    }

    /// Ingest an owned fragment, avoiding a copy when it is plain text.
    pub fn ingest_owned(&mut self, fragment: String, out: &mut Vec<TagEvent>) {
        if self.is_idle() && memchr(b'<', fragment.as_bytes()).is_none() {
            if !fragment.is_empty() {
                out.push(TagEvent::Literal(fragment));
            }
            return;
        }
        self.ingest_into(&fragment, out);
    }

    /// Ingest one fragment, appending events to `out`.
    pub fn ingest_into(&mut self, fragment: &str, out: &mut Vec<TagEvent>) {
        if fragment.is_empty() {
            return;
        }

        let input: Cow<'_, str> = if self.lookahead.is_empty() {
            Cow::Borrowed(fragment)
        } else {
            let mut joined = std::mem::take(&mut self.lookahead);
            joined.push_str(fragment);
            Cow::Owned(joined)
        };
        let input = input.as_ref();

        let mut pos = 0;
        while pos < input.len() {
            pos = match self.mode {
                ExtractorMode::Text | ExtractorMode::PendingOpen => {
                    self.scan_text(input, pos, out)
                }
                ExtractorMode::InReasoning | ExtractorMode::InToolCall => {
                    self.scan_payload(input, pos, out)
                }
            };
        }
    }

    /// Drain buffered state at end of input.
    ///
    /// An unterminated tag is never closed implicitly: its open delimiter,
    /// payload and any held-back bytes come back as one `Literal`.
    pub fn flush(&mut self) -> Vec<TagEvent> {
        let mut out = Vec::new();
        self.flush_into(&mut out);
        out
    }

    pub fn flush_into(&mut self, out: &mut Vec<TagEvent>) {
        let held = std::mem::take(&mut self.lookahead);
        match self.mode {
            ExtractorMode::Text | ExtractorMode::PendingOpen => {
                if !held.is_empty() {
                    out.push(TagEvent::Literal(held));
                }
            }
            ExtractorMode::InReasoning | ExtractorMode::InToolCall if self.overflowed => {
                self.overflowed = false;
                if !held.is_empty() {
                    out.push(TagEvent::Literal(held));
                }
            }
            ExtractorMode::InReasoning | ExtractorMode::InToolCall => {
                let tag = self.open_tag();
                tracing::warn!(
                    tag = tag.open,
                    payload_bytes = self.payload.len(),
                    "unterminated tag at end of input, emitting as text"
                );
                let mut text =
                    String::with_capacity(tag.open.len() + self.payload.len() + held.len());
                text.push_str(tag.open);
                text.push_str(&self.payload);
                text.push_str(&held);
                self.payload.clear();
                out.push(TagEvent::Literal(text));
            }
        }
        self.mode = ExtractorMode::Text;
    }

    // -- text mode ----------------------------------------------------------

    fn scan_text(&mut self, input: &str, pos: usize, out: &mut Vec<TagEvent>) -> usize {
        let bytes = input.as_bytes();
        let mut cursor = pos;
        loop {
            let Some(rel_lt) = memchr(b'<', &bytes[cursor..]) else {
                push_literal(out, &input[pos..]);
                self.mode = ExtractorMode::Text;
                return input.len();
            };
            let lt = cursor + rel_lt;

            match match_open_at(&bytes[lt..]) {
                OpenMatch::Full(tag) => {
                    push_literal(out, &input[pos..lt]);
                    self.enter(tag, out);
                    return lt + tag.open.len();
                }
                OpenMatch::Partial => {
                    // Undecided until more input arrives.
                    push_literal(out, &input[pos..lt]);
                    self.lookahead.push_str(&input[lt..]);
                    self.mode = ExtractorMode::PendingOpen;
                    return input.len();
                }
                OpenMatch::None => cursor = lt + 1,
            }
        }
    }

    fn enter(&mut self, tag: &TagDefinition, out: &mut Vec<TagEvent>) {
        self.payload.clear();
        match tag.kind {
            TagKind::Reasoning => self.mode = ExtractorMode::InReasoning,
            TagKind::ToolCall => {
                self.open_tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.mode = ExtractorMode::InToolCall;
                out.push(TagEvent::ToolCallStart(self.open_tool_index));
            }
        }
    }

    // -- tag mode -----------------------------------------------------------

    fn open_tag(&self) -> &'static TagDefinition {
        match self.mode {
            ExtractorMode::InToolCall => TagKind::ToolCall.definition(),
            _ => TagKind::Reasoning.definition(),
        }
    }

    fn scan_payload(&mut self, input: &str, pos: usize, out: &mut Vec<TagEvent>) -> usize {
        let tag = self.open_tag();
        if self.overflowed {
            return self.scan_overflowed(tag, input, pos, out);
        }
        let close = tag.close.as_bytes();
        let haystack = &input.as_bytes()[pos..];

        if let Some(rel) = memmem::find(haystack, close) {
            let end = pos + rel;
            if !self.append_payload(tag, &input[pos..end], out) {
                return end;
            }
            self.close(out);
            return end + close.len();
        }

        // Hold back a possible close-delimiter prefix; it starts with '<' so
        // the split lands on a char boundary.
        let held = partial_suffix_len(haystack, close);
        let safe_end = input.len() - held;
        if !self.append_payload(tag, &input[pos..safe_end], out) {
            return safe_end;
        }
        self.lookahead.push_str(&input[safe_end..]);
        input.len()
    }

    /// Rest of an overflowed tag: literal text up to and including its close
    /// delimiter. Nested open delimiters are not recognized here.
    fn scan_overflowed(
        &mut self,
        tag: &TagDefinition,
        input: &str,
        pos: usize,
        out: &mut Vec<TagEvent>,
    ) -> usize {
        let close = tag.close.as_bytes();
        let haystack = &input.as_bytes()[pos..];
        if let Some(rel) = memmem::find(haystack, close) {
            let end = pos + rel + close.len();
            push_literal(out, &input[pos..end]);
            self.overflowed = false;
            self.mode = ExtractorMode::Text;
            return end;
        }
        let held = partial_suffix_len(haystack, close);
        let safe_end = input.len() - held;
        push_literal(out, &input[pos..safe_end]);
        self.lookahead.push_str(&input[safe_end..]);
        input.len()
    }

    /// Append payload text. Returns false when the tag overflowed and
    /// degraded to literal text; the rest of the tag then passes through.
    fn append_payload(&mut self, tag: &TagDefinition, text: &str, out: &mut Vec<TagEvent>) -> bool {
        if self.payload.len() + text.len() > self.limits.max_payload_bytes {
            tracing::warn!(
                tag = tag.open,
                max_payload_bytes = self.limits.max_payload_bytes,
                "tag payload exceeded limit, emitting as text"
            );
            let mut literal =
                String::with_capacity(tag.open.len() + self.payload.len() + text.len());
            literal.push_str(tag.open);
            literal.push_str(&self.payload);
            literal.push_str(text);
            self.payload.clear();
            self.overflowed = true;
            out.push(TagEvent::Literal(literal));
            return false;
        }

        if text.is_empty() {
            return true;
        }
        self.payload.push_str(text);
        if self.mode == ExtractorMode::InToolCall {
            out.push(TagEvent::ToolArgumentChunk(
                self.open_tool_index,
                text.to_owned(),
            ));
        }
        true
    }

    fn close(&mut self, out: &mut Vec<TagEvent>) {
        let payload = std::mem::take(&mut self.payload);
        match self.mode {
            ExtractorMode::InToolCall => {
                out.push(TagEvent::ToolCallEnd(self.open_tool_index, payload));
            }
            _ => out.push(TagEvent::ReasoningComplete(payload)),
        }
        self.mode = ExtractorMode::Text;
    }
}

#[inline]
fn push_literal(out: &mut Vec<TagEvent>, text: &str) {
    if !text.is_empty() {
        out.push(TagEvent::Literal(text.to_owned()));
    }
}

#[cfg(test)]
#[path = "extractor_tests.rs"]
mod tests;
