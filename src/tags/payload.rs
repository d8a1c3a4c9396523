//! Interpretation of completed tag payloads.
//!
//! A tool payload must be a JSON object with a non-empty string `name` and an
//! object `arguments`. The arguments are returned as the exact raw JSON text
//! found in the payload; they are parsed only to validate them.

use serde::Deserialize;
use serde_json::value::RawValue;

/// Why a tool payload could not be turned into a tool call.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string `name` field")]
    MissingName,
    #[error("payload `name` is empty")]
    EmptyName,
    #[error("payload `arguments` is missing or not a JSON object")]
    ArgumentsNotObject,
}

/// A validated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    /// Raw JSON text of the arguments object, byte-for-byte as received.
    pub arguments: String,
}

#[derive(Deserialize)]
struct ToolPayloadWire<'a> {
    #[serde(borrow, default)]
    name: Option<&'a RawValue>,
    #[serde(borrow, default)]
    arguments: Option<&'a RawValue>,
}

/// Parse and validate a raw `<tool_call>` payload.
///
/// # Errors
///
/// Returns a [`PayloadError`] when the payload is not JSON, is not an object,
/// lacks a non-empty string `name`, or lacks an object `arguments`.
pub fn interpret_tool_payload(raw: &str) -> Result<ToolInvocation, PayloadError> {
    // serde would also accept a JSON array for a struct.
    if raw.trim_start().as_bytes().first() != Some(&b'{') {
        return Err(PayloadError::NotAnObject);
    }

    let wire: ToolPayloadWire<'_> = serde_json::from_str(raw)?;

    let name_raw = wire.name.ok_or(PayloadError::MissingName)?;
    if !name_raw.get().starts_with('"') {
        return Err(PayloadError::MissingName);
    }
    let name: String = serde_json::from_str(name_raw.get())?;
    if name.trim().is_empty() {
        return Err(PayloadError::EmptyName);
    }

    let arguments = wire
        .arguments
        .filter(|raw| raw.get().starts_with('{'))
        .ok_or(PayloadError::ArgumentsNotObject)?;

    Ok(ToolInvocation {
        name,
        arguments: arguments.get().to_owned(),
    })
}

/// Reasoning payloads are returned verbatim.
#[must_use]
pub fn interpret_reasoning_payload(raw: String) -> String {
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_name_and_object_arguments() {
        let call = interpret_tool_payload(r#"{"name":"get_weather","arguments":{"city":"Paris"}}"#)
            .unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, r#"{"city":"Paris"}"#);
    }

    #[test]
    fn keeps_raw_argument_text() {
        let raw = "\n{\"arguments\": {\"b\": 1.50, \"a\": 12345678901234567890},\n \"name\": \"f\"}\n";
        let call = interpret_tool_payload(raw).unwrap();
        assert_eq!(call.arguments, r#"{"b": 1.50, "a": 12345678901234567890}"#);
        assert_eq!(call.name, "f");
    }

    #[test]
    fn empty_arguments_object_is_valid() {
        let call = interpret_tool_payload(r#"{"name":"f","arguments":{}}"#).unwrap();
        assert_eq!(call.arguments, "{}");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let call =
            interpret_tool_payload(r#"{"id":"x","name":"f","arguments":{},"extra":[1]}"#).unwrap();
        assert_eq!(call.name, "f");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            interpret_tool_payload("{ bad json "),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        assert!(matches!(
            interpret_tool_payload(r#"["f", {}]"#),
            Err(PayloadError::NotAnObject)
        ));
        assert!(matches!(
            interpret_tool_payload(""),
            Err(PayloadError::NotAnObject)
        ));
    }

    #[test]
    fn missing_or_mistyped_name_is_rejected() {
        assert!(matches!(
            interpret_tool_payload(r#"{"arguments": {}}"#),
            Err(PayloadError::MissingName)
        ));
        assert!(matches!(
            interpret_tool_payload(r#"{"name": 7, "arguments": {}}"#),
            Err(PayloadError::MissingName)
        ));
        assert!(matches!(
            interpret_tool_payload(r#"{"name": "  ", "arguments": {}}"#),
            Err(PayloadError::EmptyName)
        ));
    }

    #[test]
    fn arguments_must_be_an_object() {
        for raw in [
            r#"{"name":"f"}"#,
            r#"{"name":"f","arguments":"{\"a\":1}"}"#,
            r#"{"name":"f","arguments":[1]}"#,
            r#"{"name":"f","arguments":null}"#,
        ] {
            assert!(
                matches!(
                    interpret_tool_payload(raw),
                    Err(PayloadError::ArgumentsNotObject)
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn escaped_names_are_decoded() {
        let call = interpret_tool_payload(r#"{"name":"a\u0062c","arguments":{}}"#).unwrap();
        assert_eq!(call.name, "abc");
    }
}
