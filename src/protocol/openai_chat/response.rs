//! Batch rewriting of a complete chat completion response.

use serde_json::Value;

use super::{message_text, OpenAiChatResponse, OpenAiChoice, OpenAiToolCall, OpenAiToolCallFunction};
use crate::tags::{parse_complete_text, ExtractorLimits, ToolCallRecord};

/// Rewrite tags in every choice. Returns how many tag-encoded tool calls
/// were recognized.
pub fn rewrite_chat_response(response: &mut OpenAiChatResponse, limits: ExtractorLimits) -> usize {
    response
        .choices
        .iter_mut()
        .map(|choice| rewrite_choice(choice, limits))
        .sum()
}

fn rewrite_choice(choice: &mut OpenAiChoice, limits: ExtractorLimits) -> usize {
    let Some(message) = choice.message.as_mut() else {
        return 0;
    };
    let assembled = {
        let Some(text) = message.content.as_ref().and_then(message_text) else {
            return 0;
        };
        // Every delimiter starts with '<'.
        if memchr::memchr(b'<', text.as_bytes()).is_none() {
            return 0;
        }
        parse_complete_text(&text, choice.finish_reason.as_deref(), limits)
    };

    message.content = if assembled.content.is_empty() {
        None
    } else {
        Some(Value::String(assembled.content))
    };

    if let Some(reasoning) = assembled.reasoning_content {
        message.reasoning_content = Some(match message.reasoning_content.take() {
            Some(native) if !native.is_empty() => format!("{native}\n{reasoning}"),
            _ => reasoning,
        });
    }

    let recognized = assembled.tool_calls.len();
    if recognized > 0 {
        let calls = message.tool_calls.get_or_insert_with(Vec::new);
        if !calls.is_empty() {
            tracing::warn!(
                native = calls.len(),
                tagged = recognized,
                "response mixes native and tag-encoded tool calls; appending tagged calls"
            );
        }
        calls.extend(assembled.tool_calls.into_iter().map(tool_call_value));
    }
    choice.finish_reason = assembled.finish_reason;
    recognized
}

fn tool_call_value(record: ToolCallRecord) -> Value {
    let call = OpenAiToolCall {
        id: record.id,
        type_: "function".to_string(),
        function: OpenAiToolCallFunction {
            name: record.name,
            arguments: record.arguments,
        },
    };
    serde_json::to_value(call).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(raw: Value) -> (Value, usize) {
        let mut response: OpenAiChatResponse = serde_json::from_value(raw).unwrap();
        let recognized = rewrite_chat_response(&mut response, ExtractorLimits::default());
        (serde_json::to_value(response).unwrap(), recognized)
    }

    fn response_with(content: Value, finish: &str) -> Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        })
    }

    #[test]
    fn plain_response_is_untouched() {
        let raw = response_with(serde_json::json!("hello"), "stop");
        let (out, recognized) = rewrite(raw.clone());
        assert_eq!(recognized, 0);
        assert_eq!(out, raw);
    }

    #[test]
    fn reasoning_and_tool_call_are_extracted() {
        let raw = response_with(
            serde_json::json!(
                "<think>plan</think>Calling.<tool_call>{\"name\":\"get_weather\",\"arguments\":{\"city\":\"Paris\"}}</tool_call>"
            ),
            "stop",
        );
        let (out, recognized) = rewrite(raw);
        assert_eq!(recognized, 1);
        let choice = &out["choices"][0];
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert_eq!(choice["message"]["content"], "Calling.");
        assert_eq!(choice["message"]["reasoning_content"], "plan");
        let call = &choice["message"]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "get_weather");
        assert_eq!(call["function"]["arguments"], "{\"city\":\"Paris\"}");
        assert!(call["id"].as_str().unwrap().starts_with("call_"));
        assert_eq!(out["usage"]["total_tokens"], 3);
    }

    #[test]
    fn empty_content_becomes_null() {
        let raw = response_with(
            serde_json::json!("<tool_call>{\"name\":\"f\",\"arguments\":{}}</tool_call>"),
            "stop",
        );
        let (out, _) = rewrite(raw);
        assert!(out["choices"][0]["message"]["content"].is_null());
    }

    #[test]
    fn malformed_payload_keeps_finish_reason() {
        let raw = response_with(
            serde_json::json!("<tool_call>{ bad json </tool_call>"),
            "length",
        );
        let (out, recognized) = rewrite(raw);
        assert_eq!(recognized, 0);
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert_eq!(
            out["choices"][0]["message"]["content"],
            "<tool_call>{ bad json </tool_call>"
        );
        assert!(out["choices"][0]["message"].get("tool_calls").is_none());
    }

    #[test]
    fn native_calls_come_first() {
        let mut raw = response_with(
            serde_json::json!("<tool_call>{\"name\":\"tagged\",\"arguments\":{}}</tool_call>"),
            "tool_calls",
        );
        raw["choices"][0]["message"]["tool_calls"] = serde_json::json!([{
            "id": "call_native",
            "type": "function",
            "function": {"name": "native", "arguments": "{}"}
        }]);
        let (out, _) = rewrite(raw);
        let calls = out["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["id"], "call_native");
        assert_eq!(calls[1]["function"]["name"], "tagged");
    }

    #[test]
    fn text_parts_content_is_flattened() {
        let raw = response_with(
            serde_json::json!([
                {"type": "text", "text": "<think>a</think>"},
                {"type": "text", "text": "b"}
            ]),
            "stop",
        );
        let (out, _) = rewrite(raw);
        assert_eq!(out["choices"][0]["message"]["content"], "b");
        assert_eq!(out["choices"][0]["message"]["reasoning_content"], "a");
    }

    #[test]
    fn native_reasoning_is_kept_first() {
        let mut raw = response_with(serde_json::json!("<think>tagged</think>x"), "stop");
        raw["choices"][0]["message"]["reasoning_content"] = serde_json::json!("native");
        let (out, _) = rewrite(raw);
        assert_eq!(
            out["choices"][0]["message"]["reasoning_content"],
            "native\ntagged"
        );
    }
}
