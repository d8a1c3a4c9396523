use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary. Never exposes the API key.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "tagproxy-rs is running",
        "config": {
            "upstream_base_url": config.upstream.base_url,
            "auth_passthrough": !state.upstream.has_api_key(),
            "features": {
                "log_level": config.features.log_level,
                "stream_tool_arguments": config.features.stream_tool_arguments,
                "max_tag_payload_bytes": config.features.max_tag_payload_bytes,
            }
        }
    }))
}
