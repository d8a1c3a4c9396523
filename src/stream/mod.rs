pub mod sse;

pub use sse::{sse_event_stream, SseParser};

use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::{Map, Value};

use crate::observability::log_request_complete;
use crate::protocol::error_shapes::stream_error_payload;
use crate::protocol::openai_chat::stream::{encode_chunk_with_extra, ChunkEnvelope, DeltaOut};
use crate::protocol::openai_chat::{OpenAiStreamChoice, OpenAiStreamChunk};
use crate::tags::{
    DeltaAssembler, ExtractorLimits, MessageDelta, TagEvent, TagExtractor, ToolStreaming,
};
use sse::{done_frame, encode_sse_event, is_done_event, openai_sse_frame};

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Unknown fields of the current upstream choice 0, copied onto the first
/// chunk emitted for it.
struct ChoiceExtra {
    choice: Map<String, Value>,
    delta: Map<String, Value>,
}

struct CompletionLog {
    request_id: String,
    model: String,
    start: Instant,
}

/// Rewrites one upstream chat completion stream.
///
/// Choice 0's `content` runs through a [`TagExtractor`] and
/// [`DeltaAssembler`]; each resulting delta becomes one outgoing chunk using
/// the upstream's envelope. Everything else passes through.
pub struct StreamingTagProcessor {
    extractor: TagExtractor,
    assembler: DeltaAssembler,
    envelope: ChunkEnvelope,
    role_sent: bool,
    done: bool,
    events: Vec<TagEvent>,
    deltas: Vec<MessageDelta>,
    pending_extra: Option<ChoiceExtra>,
    completion_log: Option<CompletionLog>,
}

impl StreamingTagProcessor {
    #[must_use]
    pub fn new(envelope: ChunkEnvelope, limits: ExtractorLimits, streaming: ToolStreaming) -> Self {
        Self {
            extractor: TagExtractor::with_limits(limits),
            assembler: DeltaAssembler::new(streaming),
            envelope,
            role_sent: false,
            done: false,
            events: Vec::with_capacity(4),
            deltas: Vec::with_capacity(4),
            pending_extra: None,
            completion_log: None,
        }
    }

    /// Log request completion when the stream terminates.
    #[must_use]
    pub fn with_completion_log(mut self, request_id: &str, model: &str, start: Instant) -> Self {
        self.completion_log = Some(CompletionLog {
            request_id: request_id.to_string(),
            model: model.to_string(),
            start,
        });
        self
    }

    /// True once `data: [DONE]` has been emitted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one upstream event, appending outgoing SSE frames to `out`.
    pub fn on_event(&mut self, event: &SseEvent, out: &mut Vec<String>) {
        if self.done {
            return;
        }
        if is_done_event(event) {
            self.finish_stream(out);
            return;
        }
        if event.event.as_deref().is_some_and(|name| name != "message") {
            out.push(encode_sse_event(event));
            return;
        }

        let Ok(mut chunk) = serde_json::from_str::<OpenAiStreamChunk>(&event.data) else {
            tracing::debug!("passing through unparseable stream frame");
            out.push(encode_sse_event(event));
            return;
        };
        self.envelope.update_from(&chunk);

        let Some(pos) = chunk.choices.iter().position(|choice| choice.index == 0) else {
            out.push(encode_sse_event(event));
            return;
        };
        let choice = chunk.choices.remove(pos);
        if !chunk.choices.is_empty() {
            match serde_json::to_string(&chunk) {
                Ok(rest) => out.push(openai_sse_frame(&rest)),
                Err(err) => tracing::error!(error = %err, "failed to re-encode stream chunk"),
            }
        }
        self.on_primary_choice(choice, out);
    }

    fn on_primary_choice(&mut self, choice: OpenAiStreamChoice, out: &mut Vec<String>) {
        let OpenAiStreamChoice {
            mut delta,
            finish_reason,
            extra,
            ..
        } = choice;
        let delta_extra = std::mem::take(&mut delta.extra);
        if !extra.is_empty() || !delta_extra.is_empty() {
            self.pending_extra = Some(ChoiceExtra {
                choice: extra,
                delta: delta_extra,
            });
        }

        if delta.role.is_some() && !self.role_sent {
            self.emit(DeltaOut::default(), None, out);
        }
        if let Some(reasoning) = delta.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            if self.assembler.observe_native_reasoning() {
                let separated = format!("\n{reasoning}");
                self.emit(DeltaOut::reasoning(&separated), None, out);
            } else {
                self.emit(DeltaOut::reasoning(reasoning), None, out);
            }
        }
        if let Some(calls) = delta.tool_calls.as_deref().filter(|calls| !calls.is_empty()) {
            for call in calls {
                if let Some(index) = call.get("index").and_then(serde_json::Value::as_u64) {
                    self.assembler
                        .observe_native_tool_call_index(usize::try_from(index).unwrap_or(usize::MAX - 1));
                }
            }
            self.emit(DeltaOut::native_tool_calls(calls), None, out);
        }
        if let Some(content) = delta.content.filter(|content| !content.is_empty()) {
            let mut events = std::mem::take(&mut self.events);
            self.extractor.ingest_owned(content, &mut events);
            self.emit_events(&mut events, out);
            self.events = events;
        }
        if let Some(reason) = finish_reason.as_deref() {
            // The upstream's finish-chunk fields (e.g. `logprobs`) belong on
            // our finish chunk, not on text released by the flush.
            let extra = self.pending_extra.take();
            self.flush_extractor(out);
            self.pending_extra = extra;
            if let Some(last) = self.assembler.finish(Some(reason)) {
                self.emit_finish(&last, out);
            }
        }
        // Nothing was emitted for this choice; keep its fields anyway.
        if self.pending_extra.is_some() {
            self.emit(DeltaOut::default(), None, out);
        }
    }

    /// End of upstream input: flush buffered text, report a finish reason
    /// if one is still owed, then emit `data: [DONE]`.
    pub fn finish_stream(&mut self, out: &mut Vec<String>) {
        if self.done {
            return;
        }
        self.flush_extractor(out);
        if let Some(last) = self.assembler.finish(None) {
            self.emit_finish(&last, out);
        }
        out.push(done_frame());
        self.done = true;
        self.log_completion();
    }

    /// The upstream failed mid-stream. Flushes what is buffered, then emits
    /// an error frame followed by `data: [DONE]`.
    pub fn fail_stream(&mut self, message: &str, out: &mut Vec<String>) {
        if self.done {
            return;
        }
        tracing::warn!(error = message, "upstream stream failed");
        self.flush_extractor(out);
        out.push(openai_sse_frame(&stream_error_payload(message).to_string()));
        out.push(done_frame());
        self.done = true;
        self.log_completion();
    }

    /// Drain the extractor. Runs again at end of stream for content that
    /// arrived after the upstream finish reason.
    fn flush_extractor(&mut self, out: &mut Vec<String>) {
        if self.extractor.is_idle() {
            return;
        }
        let mut events = std::mem::take(&mut self.events);
        self.extractor.flush_into(&mut events);
        self.emit_events(&mut events, out);
        self.events = events;
    }

    fn emit_events(&mut self, events: &mut Vec<TagEvent>, out: &mut Vec<String>) {
        let mut deltas = std::mem::take(&mut self.deltas);
        for event in events.drain(..) {
            self.assembler.on_event(event, &mut deltas);
        }
        for delta in deltas.drain(..) {
            self.emit(DeltaOut::from_message_delta(&delta), None, out);
        }
        self.deltas = deltas;
    }

    fn emit_finish(&mut self, last: &MessageDelta, out: &mut Vec<String>) {
        self.emit(DeltaOut::default(), last.finish_reason.as_deref(), out);
    }

    fn emit(&mut self, delta: DeltaOut<'_>, finish_reason: Option<&str>, out: &mut Vec<String>) {
        let role = (!self.role_sent).then_some("assistant");
        self.role_sent = true;
        let extra = self.pending_extra.take();
        let delta = delta
            .with_role(role)
            .with_extra(extra.as_ref().map(|extra| &extra.delta));
        let choice_extra = extra.as_ref().map(|extra| &extra.choice);
        match encode_chunk_with_extra(&self.envelope, 0, delta, finish_reason, choice_extra) {
            Ok(json) => out.push(openai_sse_frame(&json)),
            Err(err) => tracing::error!(error = %err, "failed to encode stream chunk"),
        }
    }

    fn log_completion(&mut self) {
        if let Some(log) = self.completion_log.take() {
            log_request_complete(&log.request_id, &log.model, true, 200, log.start);
        }
    }
}

/// Drive `processor` over upstream SSE events, yielding outgoing body chunks.
///
/// Frames produced by one upstream event are sent as one chunk. The stream
/// always ends with `data: [DONE]`, including after an upstream error.
pub fn tag_rewrite_stream<S, E>(
    events: S,
    processor: StreamingTagProcessor,
) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> + Send
where
    S: Stream<Item = Result<SseEvent, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(events), processor, Vec::<String>::with_capacity(4)),
        |(mut events, mut processor, mut frames)| async move {
            loop {
                if !frames.is_empty() {
                    let body = frames.concat();
                    frames.clear();
                    return Some((Ok(Bytes::from(body)), (events, processor, frames)));
                }
                if processor.is_done() {
                    return None;
                }
                match events.as_mut().next().await {
                    Some(Ok(event)) => processor.on_event(&event, &mut frames),
                    Some(Err(err)) => {
                        processor.fail_stream(&format!("upstream stream error: {err}"), &mut frames);
                    }
                    None => processor.finish_stream(&mut frames),
                }
            }
        },
    )
}
