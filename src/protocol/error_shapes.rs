use crate::error::ErrorCategory;
use crate::util::truncate_on_char_boundary;

const MAX_UPSTREAM_ERROR_LEN: usize = 500;

fn openai_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest | ErrorCategory::NotFound => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::Unavailable => "service_unavailable_error",
        ErrorCategory::ServerError | ErrorCategory::Unknown => "server_error",
    }
}

fn openai_error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::NotFound => "not_found",
        ErrorCategory::Authentication => "invalid_api_key",
        ErrorCategory::Permission => "permission_denied",
        ErrorCategory::RateLimit => "rate_limit_exceeded",
        ErrorCategory::Unavailable => "service_unavailable",
        ErrorCategory::ServerError | ErrorCategory::Unknown => "server_error",
    }
}

#[must_use]
pub(crate) fn openai_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": openai_error_type(cat),
            "code": openai_error_code(cat),
            "param": null,
        }
    })
}

/// Error object sent as an SSE frame when the upstream fails mid-stream.
#[must_use]
pub(crate) fn stream_error_payload(message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": "proxy_error",
            "code": "upstream_stream_error",
            "param": null,
        }
    })
}

/// Extract a short client-safe message from an upstream error body.
#[must_use]
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = json
            .get("error")
            .and_then(|e| e.get("message").or_else(|| e.as_str().map(|_| e)))
            .and_then(serde_json::Value::as_str)
            .or_else(|| json.get("message").and_then(serde_json::Value::as_str));
        if let Some(msg) = message {
            return truncated(msg);
        }
    }

    match std::str::from_utf8(body) {
        Ok(text) if !text.trim().is_empty() => truncated(text.trim()),
        _ => "upstream returned an error".to_string(),
    }
}

fn truncated(msg: &str) -> String {
    let cut = truncate_on_char_boundary(msg, MAX_UPSTREAM_ERROR_LEN);
    if cut.len() < msg.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}
