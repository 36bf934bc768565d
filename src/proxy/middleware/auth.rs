//! API-key gate for the /v1 surface.
//!
//! Matching order: static key from config first (constant-time compare),
//! then the dynamic key store, which also gets its usage counters bumped on
//! a hit. Rejections use the OpenAI error body shape.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::modules::storage::KeyStore;

pub struct AuthGate {
    pub api_key: String,
    pub key_store: KeyStore,
}

pub async fn api_key_auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    request: Request,
    next: Next,
) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(header_value) = header_value else {
        return unauthorized("Missing Authorization header", "missing_api_key");
    };
    let presented = strip_bearer(header_value);

    if !gate.api_key.is_empty() && constant_time_str_eq(presented, &gate.api_key) {
        return next.run(request).await;
    }

    match gate.key_store.load(presented) {
        Ok(mut key) => {
            key.update_usage();
            if let Err(e) = gate.key_store.save(&key) {
                error!(error = %e, "Failed to update key usage");
            }
            next.run(request).await
        }
        Err(_) => {
            warn!(key_prefix = %mask_api_key(presented), "Invalid API key attempt");
            unauthorized("Invalid API key", "invalid_api_key")
        }
    }
}

/// The `Bearer ` prefix is optional; bare keys are accepted too.
fn strip_bearer(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value)
}

fn unauthorized(message: &str, code: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "message": message,
                "type": "invalid_request_error",
                "code": code,
            }
        })),
    )
        .into_response()
}

fn constant_time_str_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let max_len = left_bytes.len().max(right_bytes.len());
    let mut diff = left_bytes.len() ^ right_bytes.len();

    for i in 0..max_len {
        let l = left_bytes.get(i).copied().unwrap_or(0);
        let r = right_bytes.get(i).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }

    diff == 0
}

fn mask_api_key(key: &str) -> String {
    if key.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}
