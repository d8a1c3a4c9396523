//! Tag extraction core.
//!
//! Model output may embed `<think>…</think>` reasoning and
//! `<tool_call>{json}</tool_call>` invocations inline with ordinary text.
//! [`extractor::TagExtractor`] turns text fragments into [`TagEvent`]s;
//! [`message::MessageAssembler`] folds them into one finished message and
//! [`delta::DeltaAssembler`] folds them into incremental deltas.

pub mod catalog;
pub mod delta;
pub mod extractor;
pub mod message;
pub mod payload;
mod sniff;

pub use catalog::{TagDefinition, TagKind, REASONING, TOOL_CALL};
pub use delta::{DeltaAssembler, DeltaMerger, MessageDelta, ToolCallDelta, ToolStreaming};
pub use extractor::{
    ExtractorLimits, ExtractorMode, TagEvent, TagExtractor, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use message::{assemble, parse_complete_text, AssembledMessage, MessageAssembler, ToolCallRecord};
pub use payload::{interpret_reasoning_payload, interpret_tool_payload, PayloadError, ToolInvocation};

/// Finish reason reported whenever at least one tag-encoded tool call was recognized.
pub const TOOL_CALLS_FINISH_REASON: &str = "tool_calls";
