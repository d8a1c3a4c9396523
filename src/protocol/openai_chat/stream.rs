//! Encoding of outgoing chat completion chunks.

use serde::Serialize;
use serde_json::{Map, Value};

use super::OpenAiStreamChunk;
use crate::tags::{MessageDelta, ToolCallDelta};
use crate::util::unix_now_secs;

const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// Envelope fields copied from the most recent upstream chunk.
#[derive(Debug, Clone)]
pub struct ChunkEnvelope {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub system_fingerprint: Option<String>,
}

impl ChunkEnvelope {
    /// Envelope used until the upstream reports its own.
    #[must_use]
    pub fn fallback(id: String, model: &str) -> Self {
        Self {
            id,
            model: model.to_string(),
            created: unix_now_secs(),
            system_fingerprint: None,
        }
    }

    pub fn update_from(&mut self, chunk: &OpenAiStreamChunk) {
        if let Some(id) = chunk.id.as_deref().filter(|id| !id.is_empty()) {
            if id != self.id {
                self.id = id.to_string();
            }
        }
        if let Some(model) = chunk.model.as_deref().filter(|model| !model.is_empty()) {
            if model != self.model {
                self.model = model.to_string();
            }
        }
        if let Some(created) = chunk.created {
            self.created = created;
        }
        if chunk.system_fingerprint.is_some() {
            self.system_fingerprint.clone_from(&chunk.system_fingerprint);
        }
    }
}

#[derive(Serialize)]
struct ChunkOut<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_fingerprint: Option<&'a str>,
    choices: [ChoiceOut<'a>; 1],
}

#[derive(Serialize)]
struct ChoiceOut<'a> {
    index: u32,
    delta: DeltaOut<'a>,
    finish_reason: Option<&'a str>,
    #[serde(flatten)]
    extra: Option<&'a Map<String, Value>>,
}

/// Borrowed view of one outgoing `delta` object.
#[derive(Serialize, Default)]
pub struct DeltaOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<ToolCallsOut<'a>>,
    /// Extension field: indices of tool calls the client must discard.
    #[serde(skip_serializing_if = "<[usize]>::is_empty")]
    retracted_tool_calls: &'a [usize],
    /// Unknown upstream delta fields, e.g. `refusal`.
    #[serde(flatten)]
    extra: Option<&'a Map<String, Value>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ToolCallsOut<'a> {
    Native(&'a [Value]),
    Tagged(Vec<ToolCallDeltaOut<'a>>),
}

#[derive(Serialize)]
struct ToolCallDeltaOut<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    type_: Option<&'static str>,
    function: FunctionDeltaOut<'a>,
}

#[derive(Serialize)]
struct FunctionDeltaOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a str>,
}

impl<'a> DeltaOut<'a> {
    #[must_use]
    pub fn from_message_delta(delta: &'a MessageDelta) -> Self {
        let tool_calls = (!delta.tool_calls.is_empty())
            .then(|| ToolCallsOut::Tagged(delta.tool_calls.iter().map(tool_call_out).collect()));
        Self {
            role: None,
            content: delta.content.as_deref(),
            reasoning_content: delta.reasoning_content.as_deref(),
            tool_calls,
            retracted_tool_calls: &delta.retracted_tool_calls,
            extra: None,
        }
    }

    #[must_use]
    pub fn native_tool_calls(calls: &'a [Value]) -> Self {
        Self {
            tool_calls: Some(ToolCallsOut::Native(calls)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reasoning(text: &'a str) -> Self {
        Self {
            reasoning_content: Some(text),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: Option<&'a str>) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Option<&'a Map<String, Value>>) -> Self {
        self.extra = extra.filter(|extra| !extra.is_empty());
        self
    }

    /// True when serializing would give `{}`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.reasoning_content.is_none()
            && self.tool_calls.is_none()
            && self.retracted_tool_calls.is_empty()
            && self.extra.is_none()
    }
}

fn tool_call_out(call: &ToolCallDelta) -> ToolCallDeltaOut<'_> {
    ToolCallDeltaOut {
        index: call.index,
        id: call.id.as_deref(),
        type_: call.id.as_ref().map(|_| "function"),
        function: FunctionDeltaOut {
            name: call.name.as_deref(),
            arguments: call.arguments.as_deref(),
        },
    }
}

/// Serialize one `chat.completion.chunk` carrying a single choice.
///
/// # Errors
///
/// Returns the serializer error; only possible for non-string map keys,
/// which these types never produce.
pub fn encode_chunk(
    envelope: &ChunkEnvelope,
    index: u32,
    delta: DeltaOut<'_>,
    finish_reason: Option<&str>,
) -> Result<String, serde_json::Error> {
    encode_chunk_with_extra(envelope, index, delta, finish_reason, None)
}

/// Like [`encode_chunk`], also copying unknown upstream choice fields such
/// as `logprobs` onto the choice.
///
/// # Errors
///
/// Returns the serializer error.
pub fn encode_chunk_with_extra(
    envelope: &ChunkEnvelope,
    index: u32,
    delta: DeltaOut<'_>,
    finish_reason: Option<&str>,
    choice_extra: Option<&Map<String, Value>>,
) -> Result<String, serde_json::Error> {
    let chunk = ChunkOut {
        id: &envelope.id,
        object: CHUNK_OBJECT,
        created: envelope.created,
        model: &envelope.model,
        system_fingerprint: envelope.system_fingerprint.as_deref(),
        choices: [ChoiceOut {
            index,
            delta,
            finish_reason,
            extra: choice_extra.filter(|extra| !extra.is_empty()),
        }],
    };
    serde_json::to_string(&chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> ChunkEnvelope {
        ChunkEnvelope {
            id: "chatcmpl-abc".into(),
            model: "m".into(),
            created: 42,
            system_fingerprint: None,
        }
    }

    fn encode(delta: DeltaOut<'_>, finish: Option<&str>) -> Value {
        serde_json::from_str(&encode_chunk(&envelope(), 0, delta, finish).unwrap()).unwrap()
    }

    #[test]
    fn content_chunk_shape() {
        let delta = MessageDelta {
            content: Some("hi".into()),
            ..MessageDelta::default()
        };
        let chunk = encode(
            DeltaOut::from_message_delta(&delta).with_role(Some("assistant")),
            None,
        );
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["id"], "chatcmpl-abc");
        assert_eq!(chunk["created"], 42);
        assert!(chunk.get("system_fingerprint").is_none());
        let choice = &chunk["choices"][0];
        assert_eq!(choice["index"], 0);
        assert!(choice["finish_reason"].is_null());
        assert_eq!(
            choice["delta"],
            serde_json::json!({"role": "assistant", "content": "hi"})
        );
    }

    #[test]
    fn tool_call_header_and_arguments() {
        let header = MessageDelta {
            tool_calls: vec![ToolCallDelta {
                index: 1,
                id: Some("call_x".into()),
                name: Some("f".into()),
                arguments: Some(String::new()),
            }],
            ..MessageDelta::default()
        };
        let chunk = encode(DeltaOut::from_message_delta(&header), None);
        assert_eq!(
            chunk["choices"][0]["delta"]["tool_calls"][0],
            serde_json::json!({
                "index": 1,
                "id": "call_x",
                "type": "function",
                "function": {"name": "f", "arguments": ""}
            })
        );

        let args = MessageDelta {
            tool_calls: vec![ToolCallDelta {
                index: 1,
                arguments: Some("{\"a\":1}".into()),
                ..ToolCallDelta::default()
            }],
            ..MessageDelta::default()
        };
        let chunk = encode(DeltaOut::from_message_delta(&args), None);
        assert_eq!(
            chunk["choices"][0]["delta"]["tool_calls"][0],
            serde_json::json!({"index": 1, "function": {"arguments": "{\"a\":1}"}})
        );
    }

    #[test]
    fn retraction_and_finish() {
        let delta = MessageDelta {
            content: Some("<tool_call>x".into()),
            retracted_tool_calls: vec![0],
            ..MessageDelta::default()
        };
        let chunk = encode(DeltaOut::from_message_delta(&delta), None);
        assert_eq!(
            chunk["choices"][0]["delta"]["retracted_tool_calls"],
            serde_json::json!([0])
        );

        let chunk = encode(DeltaOut::default(), Some("tool_calls"));
        assert_eq!(chunk["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(chunk["choices"][0]["finish_reason"], "tool_calls");
    }

    #[test]
    fn unknown_choice_and_delta_fields_are_copied() {
        let mut choice_extra = Map::new();
        choice_extra.insert("logprobs".into(), serde_json::json!({"content": []}));
        let mut delta_extra = Map::new();
        delta_extra.insert("refusal".into(), Value::Null);
        let json = encode_chunk_with_extra(
            &envelope(),
            0,
            DeltaOut::default().with_extra(Some(&delta_extra)),
            Some("stop"),
            Some(&choice_extra),
        )
        .unwrap();
        let chunk: Value = serde_json::from_str(&json).unwrap();
        let choice = &chunk["choices"][0];
        assert_eq!(choice["logprobs"], serde_json::json!({"content": []}));
        assert_eq!(choice["delta"], serde_json::json!({"refusal": null}));
        assert_eq!(choice["finish_reason"], "stop");

        let empty = Map::new();
        let chunk = encode(DeltaOut::default().with_extra(Some(&empty)), None);
        assert_eq!(chunk["choices"][0]["delta"], serde_json::json!({}));
    }

    #[test]
    fn native_calls_are_verbatim() {
        let calls = vec![serde_json::json!({"index": 0, "id": "n", "function": {"name": "f"}})];
        let chunk = encode(DeltaOut::native_tool_calls(&calls), None);
        assert_eq!(
            chunk["choices"][0]["delta"]["tool_calls"],
            Value::Array(calls.clone())
        );
    }

    #[test]
    fn envelope_tracks_upstream() {
        let mut env = ChunkEnvelope::fallback("chatcmpl-local".into(), "requested");
        let chunk: OpenAiStreamChunk = serde_json::from_value(serde_json::json!({
            "id": "up-1", "model": "served", "created": 7, "system_fingerprint": "fp",
            "choices": []
        }))
        .unwrap();
        env.update_from(&chunk);
        assert_eq!(env.id, "up-1");
        assert_eq!(env.model, "served");
        assert_eq!(env.created, 7);
        assert_eq!(env.system_fingerprint.as_deref(), Some("fp"));
    }
}
