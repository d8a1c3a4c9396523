//! Streaming assembly of [`TagEvent`]s into incremental message deltas.
//!
//! Tool-call indices are allocated when a call is first announced to the
//! consumer, so they stay dense and stable for the lifetime of a response.
//! A call that was announced and then turns out to be malformed is retracted
//! explicitly through [`MessageDelta::retracted_tool_calls`].

use std::collections::BTreeMap;

use super::catalog::TOOL_CALL;
use super::extractor::TagEvent;
use super::message::{AssembledMessage, ToolCallRecord};
use super::payload::{interpret_reasoning_payload, interpret_tool_payload};
use super::sniff::{sniff_tool_header, HeaderSniff, ObjectScanner};
use super::TOOL_CALLS_FINISH_REASON;
use crate::util::next_call_id;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One tool-call fragment inside a delta.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    /// Present on the first delta of a call.
    pub id: Option<String>,
    /// Present on the first delta of a call.
    pub name: Option<String>,
    /// Raw arguments text to append.
    pub arguments: Option<String>,
}

/// Partial update to a streamed message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Indices of previously announced calls the consumer must discard.
    /// Applied before the other fields of the same delta.
    pub retracted_tool_calls: Vec<usize>,
    pub finish_reason: Option<String>,
}

impl MessageDelta {
    fn content(text: String) -> Self {
        Self {
            content: Some(text),
            ..Self::default()
        }
    }

    fn tool_call(call: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![call],
            ..Self::default()
        }
    }
}

/// When tool calls are revealed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolStreaming {
    /// Announce a call only after its payload closed and validated.
    #[default]
    Buffered,
    /// Announce a call as soon as its name is readable and stream the
    /// arguments text as it arrives.
    Incremental,
}

#[derive(Debug)]
enum CallPhase {
    /// Waiting for the complete payload.
    Buffered,
    /// Accumulating until the header can be read.
    Sniffing { payload: String },
    /// Announced; arguments are being streamed.
    Streaming(AnnouncedCall),
}

#[derive(Debug)]
struct AnnouncedCall {
    index: usize,
    name: String,
    payload: String,
    scanned_to: usize,
    scanner: ObjectScanner,
    streamed: String,
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

/// Folds each fragment's events into deltas for one streamed response.
#[derive(Debug)]
pub struct DeltaAssembler {
    streaming: ToolStreaming,
    next_index: usize,
    open_call: Option<CallPhase>,
    reasoning_started: bool,
    native_reasoning: bool,
    content_started: bool,
    completed_calls: usize,
    finished: bool,
}

impl Default for DeltaAssembler {
    fn default() -> Self {
        Self::new(ToolStreaming::default())
    }
}

impl DeltaAssembler {
    #[must_use]
    pub fn new(streaming: ToolStreaming) -> Self {
        Self {
            streaming,
            next_index: 0,
            open_call: None,
            reasoning_started: false,
            native_reasoning: false,
            content_started: false,
            completed_calls: 0,
            finished: false,
        }
    }

    /// Number of tag-encoded calls that completed successfully.
    #[must_use]
    pub fn completed_tool_calls(&self) -> usize {
        self.completed_calls
    }

    /// True once any content delta has been produced.
    #[must_use]
    pub fn content_started(&self) -> bool {
        self.content_started
    }

    /// Reserve indices already used by upstream-native tool calls.
    pub fn observe_native_tool_call_index(&mut self, index: usize) {
        self.next_index = self.next_index.max(index + 1);
    }

    /// Record upstream-native reasoning text in the same response, so the
    /// next tagged block is joined to it with `\n`. Returns true when the
    /// native text itself follows tagged reasoning and needs the separator.
    pub fn observe_native_reasoning(&mut self) -> bool {
        let needs_separator = self.reasoning_started && !self.native_reasoning;
        self.reasoning_started = true;
        self.native_reasoning = true;
        needs_separator
    }

    pub fn on_events<I>(&mut self, events: I) -> Vec<MessageDelta>
    where
        I: IntoIterator<Item = TagEvent>,
    {
        let mut out = Vec::new();
        for event in events {
            self.on_event(event, &mut out);
        }
        out
    }

    pub fn on_event(&mut self, event: TagEvent, out: &mut Vec<MessageDelta>) {
        match event {
            TagEvent::Literal(text) => self.on_literal(text, out),
            TagEvent::ReasoningComplete(text) => {
                let text = interpret_reasoning_payload(text);
                let reasoning = if self.reasoning_started {
                    let mut joined = String::with_capacity(text.len() + 1);
                    joined.push('\n');
                    joined.push_str(&text);
                    joined
                } else {
                    text
                };
                self.reasoning_started = true;
                out.push(MessageDelta {
                    reasoning_content: Some(reasoning),
                    ..MessageDelta::default()
                });
            }
            TagEvent::ToolCallStart(_) => {
                self.open_call = Some(match self.streaming {
                    ToolStreaming::Buffered => CallPhase::Buffered,
                    ToolStreaming::Incremental => CallPhase::Sniffing {
                        payload: String::new(),
                    },
                });
            }
            TagEvent::ToolArgumentChunk(_, chunk) => self.on_argument_chunk(&chunk, out),
            TagEvent::ToolCallEnd(_, payload) => self.on_tool_call_end(payload, out),
        }
    }

    /// Produce the closing delta. Returns `None` when already finished or
    /// when there is no finish reason to report.
    pub fn finish(&mut self, upstream_finish_reason: Option<&str>) -> Option<MessageDelta> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let finish_reason = if self.completed_calls > 0 {
            Some(TOOL_CALLS_FINISH_REASON.to_owned())
        } else {
            upstream_finish_reason.map(str::to_owned)
        }?;
        Some(MessageDelta {
            finish_reason: Some(finish_reason),
            ..MessageDelta::default()
        })
    }

    // -- event handlers -----------------------------------------------------

    fn on_literal(&mut self, text: String, out: &mut Vec<MessageDelta>) {
        if text.is_empty() {
            return;
        }
        self.content_started = true;
        // A literal while a call is open is that call degrading to text
        // (unterminated at end of input, or over the payload limit).
        match self.open_call.take() {
            Some(CallPhase::Streaming(call)) => out.push(MessageDelta {
                content: Some(text),
                retracted_tool_calls: vec![call.index],
                ..MessageDelta::default()
            }),
            _ => out.push(MessageDelta::content(text)),
        }
    }

    fn on_argument_chunk(&mut self, chunk: &str, out: &mut Vec<MessageDelta>) {
        match self.open_call.as_mut() {
            None | Some(CallPhase::Buffered) => {}
            Some(CallPhase::Streaming(call)) => {
                call.payload.push_str(chunk);
                stream_arguments(call, out);
            }
            Some(CallPhase::Sniffing { payload }) => {
                payload.push_str(chunk);
                match sniff_tool_header(payload) {
                    HeaderSniff::NeedMore => {}
                    HeaderSniff::Unsupported => self.open_call = Some(CallPhase::Buffered),
                    HeaderSniff::Header {
                        name,
                        arguments_start,
                    } => {
                        let payload = std::mem::take(payload);
                        self.announce(name, payload, arguments_start, out);
                    }
                }
            }
        }
    }

    fn announce(
        &mut self,
        name: String,
        payload: String,
        arguments_start: usize,
        out: &mut Vec<MessageDelta>,
    ) {
        let index = self.allocate_index();
        out.push(header_delta(index, next_call_id(), name.clone()));
        let mut call = AnnouncedCall {
            index,
            name,
            payload,
            scanned_to: arguments_start,
            scanner: ObjectScanner::default(),
            streamed: String::new(),
        };
        stream_arguments(&mut call, out);
        self.open_call = Some(CallPhase::Streaming(call));
    }

    fn on_tool_call_end(&mut self, payload: String, out: &mut Vec<MessageDelta>) {
        let phase = self.open_call.take();
        let parsed = interpret_tool_payload(&payload);

        if let Some(CallPhase::Streaming(call)) = phase {
            match parsed {
                Ok(parsed) if parsed.name == call.name && parsed.arguments == call.streamed => {
                    self.completed_calls += 1;
                }
                Ok(parsed) => {
                    tracing::debug!(
                        index = call.index,
                        "streamed tool call differs from final payload, re-announcing"
                    );
                    let index = self.allocate_index();
                    let mut header = header_delta(index, next_call_id(), parsed.name);
                    header.retracted_tool_calls.push(call.index);
                    out.push(header);
                    out.push(arguments_delta(index, parsed.arguments));
                    self.completed_calls += 1;
                }
                Err(err) => {
                    tracing::debug!(error = %err, index = call.index, "retracting streamed tool call");
                    self.content_started = true;
                    out.push(MessageDelta {
                        content: Some(TOOL_CALL.wrap(&payload)),
                        retracted_tool_calls: vec![call.index],
                        ..MessageDelta::default()
                    });
                }
            }
            return;
        }

        match parsed {
            Ok(parsed) => {
                let index = self.allocate_index();
                out.push(header_delta(index, next_call_id(), parsed.name));
                out.push(arguments_delta(index, parsed.arguments));
                self.completed_calls += 1;
            }
            Err(err) => {
                tracing::debug!(error = %err, "tool_call payload rejected, keeping it as text");
                self.content_started = true;
                out.push(MessageDelta::content(TOOL_CALL.wrap(&payload)));
            }
        }
    }

    fn allocate_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

fn header_delta(index: usize, id: String, name: String) -> MessageDelta {
    MessageDelta::tool_call(ToolCallDelta {
        index,
        id: Some(id),
        name: Some(name),
        arguments: Some(String::new()),
    })
}

fn arguments_delta(index: usize, arguments: String) -> MessageDelta {
    MessageDelta::tool_call(ToolCallDelta {
        index,
        id: None,
        name: None,
        arguments: Some(arguments),
    })
}

fn stream_arguments(call: &mut AnnouncedCall, out: &mut Vec<MessageDelta>) {
    let pending = &call.payload[call.scanned_to..];
    if pending.is_empty() || call.scanner.is_complete() {
        return;
    }
    // The scanner stops on an ASCII brace or at the end, both char boundaries.
    let consumed = call.scanner.advance(pending.as_bytes());
    if consumed == 0 {
        return;
    }
    let piece = &pending[..consumed];
    call.streamed.push_str(piece);
    out.push(arguments_delta(call.index, piece.to_owned()));
    call.scanned_to += consumed;
}

// ---------------------------------------------------------------------------
// Consumer-side merge
// ---------------------------------------------------------------------------

/// Merges deltas into a running transcript the way a client would.
#[derive(Debug, Default)]
pub struct DeltaMerger {
    content: String,
    reasoning: Option<String>,
    calls: BTreeMap<usize, ToolCallRecord>,
    finish_reason: Option<String>,
}

impl DeltaMerger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &MessageDelta) {
        for index in &delta.retracted_tool_calls {
            self.calls.remove(index);
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }
        if let Some(reasoning) = &delta.reasoning_content {
            self.reasoning
                .get_or_insert_with(String::new)
                .push_str(reasoning);
        }
        for call in &delta.tool_calls {
            let record = self.calls.entry(call.index).or_default();
            if let Some(id) = &call.id {
                record.id.clone_from(id);
            }
            if let Some(name) = &call.name {
                record.name.clone_from(name);
            }
            if let Some(arguments) = &call.arguments {
                record.arguments.push_str(arguments);
            }
        }
        if let Some(reason) = &delta.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }

    /// Indices of the calls currently in the transcript.
    #[must_use]
    pub fn tool_call_indices(&self) -> Vec<usize> {
        self.calls.keys().copied().collect()
    }

    #[must_use]
    pub fn into_message(self) -> AssembledMessage {
        AssembledMessage {
            content: self.content,
            reasoning_content: self.reasoning,
            tool_calls: self.calls.into_values().collect(),
            finish_reason: self.finish_reason,
        }
    }
}
