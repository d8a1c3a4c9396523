//! `POST /v1/chat/completions`: forward to the upstream, rewrite tags in the
//! response.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::observability::log_request_complete;
use crate::protocol::error_shapes::sanitize_upstream_error;
use crate::protocol::openai_chat::response::rewrite_chat_response;
use crate::protocol::openai_chat::stream::ChunkEnvelope;
use crate::protocol::openai_chat::{parse_chat_request, OpenAiChatResponse};
use crate::state::AppState;
use crate::stream::{sse_event_stream, tag_rewrite_stream, StreamingTagProcessor};

struct RequestContext {
    seq: u64,
    id: String,
    model: String,
    start: Instant,
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let start = Instant::now();
    let seq = state.next_request_seq();
    let request_id = state.request_uuid(seq).to_string();

    let request = match parse_chat_request(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(request_id = %request_id, error = %err, "rejecting chat request");
            return err.into_response();
        }
    };
    let stream = request.is_stream();
    let ctx = RequestContext {
        seq,
        id: request_id,
        model: request.model_name().to_string(),
        start,
    };

    let result = if stream {
        handle_stream(&state, &ctx, &headers, body).await
    } else {
        handle_non_stream(&state, &ctx, &headers, body).await
    };

    match result {
        Ok(response) => {
            // Streams log when the body finishes.
            if !stream {
                log_request_complete(&ctx.id, &ctx.model, false, 200, ctx.start);
            }
            response
        }
        Err(err) => {
            let status = err.status_code();
            tracing::warn!(request_id = %ctx.id, error = %err, "chat completion failed");
            log_request_complete(&ctx.id, &ctx.model, stream, status.as_u16(), ctx.start);
            err.into_response()
        }
    }
}

async fn handle_non_stream(
    state: &AppState,
    ctx: &RequestContext,
    client_headers: &HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, ProxyError> {
    let headers = state.upstream.request_headers(client_headers);
    let response = state
        .transport
        .send_request(state.upstream.chat_url(), &headers, body)
        .await?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(|err| {
        ProxyError::Transport(format!("failed to read upstream response body: {err}"))
    })?;
    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&bytes),
        });
    }

    let mut parsed: OpenAiChatResponse = match serde_json::from_slice(&bytes) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(
                request_id = %ctx.id,
                error = %err,
                "upstream response is not a chat completion, passing through"
            );
            return Ok(ok_json_response(bytes));
        }
    };
    let recognized = rewrite_chat_response(&mut parsed, state.extractor_limits());
    if recognized > 0 {
        tracing::debug!(request_id = %ctx.id, tool_calls = recognized, "extracted tagged tool calls");
    }
    let out = serde_json::to_vec(&parsed)
        .map_err(|err| ProxyError::Internal(format!("failed to encode response: {err}")))?;
    Ok(ok_json_response(bytes::Bytes::from(out)))
}

async fn handle_stream(
    state: &AppState,
    ctx: &RequestContext,
    client_headers: &HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, ProxyError> {
    let headers = state.upstream.request_headers(client_headers);
    let response = state
        .transport
        .send_stream(state.upstream.chat_url(), &headers, body)
        .await?;
    let status = response.status();
    if !status.is_success() {
        let bytes = response.bytes().await.map_err(|err| {
            ProxyError::Transport(format!("failed to read upstream error body: {err}"))
        })?;
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&bytes),
        });
    }

    let envelope = ChunkEnvelope::fallback(state.fallback_completion_id(ctx.seq), &ctx.model);
    let processor =
        StreamingTagProcessor::new(envelope, state.extractor_limits(), state.tool_streaming())
            .with_completion_log(&ctx.id, &ctx.model, ctx.start);
    let events = sse_event_stream(response.bytes_stream());
    Ok(sse_ok_response(Body::from_stream(tag_rewrite_stream(
        events, processor,
    ))))
}

#[inline]
fn ok_json_response(body_bytes: bytes::Bytes) -> Response {
    let mut response = Response::new(Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
