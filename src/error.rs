use crate::protocol::error_shapes::openai_error_payload;

/// Error type for request handling.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Could not connect to upstream: {0}")]
    Transport(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and error type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Unavailable,
    ServerError,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        404 => ErrorCategory::NotFound,
        429 => ErrorCategory::RateLimit,
        503 => ErrorCategory::Unavailable,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl ProxyError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProxyError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            ProxyError::Transport(_) => ErrorCategory::Unavailable,
            ProxyError::Config(_) | ProxyError::Internal(_) => ErrorCategory::ServerError,
            ProxyError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// HTTP status returned to the client. Upstream failures keep the
    /// upstream's status code.
    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            ProxyError::Transport(_) => http::StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Config(_) | ProxyError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Upstream { status, .. } => {
                http::StatusCode::from_u16(*status).unwrap_or(http::StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Message shown to clients.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ProxyError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Format an error as `(status, OpenAI error body)`.
#[must_use]
pub fn format_error(err: &ProxyError) -> (http::StatusCode, serde_json::Value) {
    let status = err.status_code();
    let body = openai_error_payload(err.category(), &err.client_message());
    (status, body)
}

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}
