pub mod response;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProxyError;

/// The few request fields the proxy reads. The body itself is forwarded
/// unchanged.
#[derive(Debug, Deserialize)]
pub struct ChatRequestEnvelope {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<serde::de::IgnoredAny>>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatRequestEnvelope {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }
}

/// Parse and minimally validate a chat completion request body.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidRequest`] when the body is not a JSON object
/// or has no `messages` array.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequestEnvelope, ProxyError> {
    let envelope: ChatRequestEnvelope = serde_json::from_slice(body)
        .map_err(|err| ProxyError::InvalidRequest(format!("invalid JSON body: {err}")))?;
    if envelope.messages.is_none() {
        return Err(ProxyError::InvalidRequest(
            "'messages' is a required property".to_string(),
        ));
    }
    Ok(envelope)
}

/// `OpenAI` Chat Completion response. Unknown fields are preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatResponse {
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single choice in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<OpenAiMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Assistant message in a response choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Native tool calls are kept as raw JSON and copied through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

/// A tool call produced from a `<tool_call>` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub function: OpenAiToolCallFunction,
}

/// The function part of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCallFunction {
    pub name: String,
    pub arguments: String,
}

/// A streaming chunk from the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_fingerprint: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Flatten message content to text. Accepts a string or an array of
/// `{"type":"text","text":...}` parts; other shapes have no text.
#[must_use]
pub fn message_text(content: &Value) -> Option<std::borrow::Cow<'_, str>> {
    match content {
        Value::String(text) => Some(std::borrow::Cow::Borrowed(text.as_str())),
        Value::Array(parts) => {
            let mut text = String::new();
            let mut found = false;
            for part in parts {
                let is_text = part.get("type").and_then(Value::as_str) == Some("text");
                if let (true, Some(piece)) = (is_text, part.get("text").and_then(Value::as_str)) {
                    text.push_str(piece);
                    found = true;
                }
            }
            found.then_some(std::borrow::Cow::Owned(text))
        }
        _ => None,
    }
}
