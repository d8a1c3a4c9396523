use super::catalog::TOOL_CALL;
use super::extractor::{ExtractorLimits, TagEvent, TagExtractor};
use super::payload::{interpret_reasoning_payload, interpret_tool_payload};
use super::TOOL_CALLS_FINISH_REASON;
use crate::util::next_call_id;

/// A tool call recovered from a `<tool_call>` tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments text.
    pub arguments: String,
}

/// Final message produced from a complete model output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssembledMessage {
    pub content: String,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub finish_reason: Option<String>,
}

/// Folds a complete event sequence into an [`AssembledMessage`].
#[derive(Debug, Default)]
pub struct MessageAssembler {
    content: String,
    reasoning: Option<String>,
    tool_calls: Vec<ToolCallRecord>,
}

impl MessageAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TagEvent) {
        match event {
            TagEvent::Literal(text) => self.content.push_str(&text),
            TagEvent::ReasoningComplete(text) => {
                let text = interpret_reasoning_payload(text);
                match self.reasoning.as_mut() {
                    Some(reasoning) => {
                        reasoning.push('\n');
                        reasoning.push_str(&text);
                    }
                    None => self.reasoning = Some(text),
                }
            }
            TagEvent::ToolCallStart(_) | TagEvent::ToolArgumentChunk(..) => {}
            TagEvent::ToolCallEnd(_, payload) => match interpret_tool_payload(&payload) {
                Ok(call) => self.tool_calls.push(ToolCallRecord {
                    id: next_call_id(),
                    name: call.name,
                    arguments: call.arguments,
                }),
                Err(err) => {
                    tracing::debug!(error = %err, "tool_call payload rejected, keeping it as text");
                    self.content.push_str(&TOOL_CALL.wrap(&payload));
                }
            },
        }
    }

    pub fn extend<I: IntoIterator<Item = TagEvent>>(&mut self, events: I) {
        for event in events {
            self.push(event);
        }
    }

    /// Finish the message. Any recognized tool call forces the
    /// `tool_calls` finish reason; otherwise the upstream reason is kept.
    #[must_use]
    pub fn finish(self, upstream_finish_reason: Option<&str>) -> AssembledMessage {
        let finish_reason = if self.tool_calls.is_empty() {
            upstream_finish_reason.map(str::to_owned)
        } else {
            Some(TOOL_CALLS_FINISH_REASON.to_owned())
        };
        AssembledMessage {
            content: self.content,
            reasoning_content: self.reasoning,
            tool_calls: self.tool_calls,
            finish_reason,
        }
    }
}

/// Fold `events` into one message.
#[must_use]
pub fn assemble<I>(events: I, upstream_finish_reason: Option<&str>) -> AssembledMessage
where
    I: IntoIterator<Item = TagEvent>,
{
    let mut assembler = MessageAssembler::new();
    assembler.extend(events);
    assembler.finish(upstream_finish_reason)
}

/// Run a complete text through a fresh extractor and assemble the result.
#[must_use]
pub fn parse_complete_text(
    text: &str,
    upstream_finish_reason: Option<&str>,
    limits: ExtractorLimits,
) -> AssembledMessage {
    let mut extractor = TagExtractor::with_limits(limits);
    let mut events = extractor.ingest(text);
    extractor.flush_into(&mut events);
    assemble(events, upstream_finish_reason)
}
