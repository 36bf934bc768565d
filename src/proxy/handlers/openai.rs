//! OpenAI-compatible proxy handlers: chat completions and the model list.
//!
//! The completion handler is the retry-and-rotate orchestrator. Each attempt
//! acquires a fresh account from the pool, translates and fires the request,
//! then classifies the outcome; the classification decides both the account
//! bookkeeping and whether the loop continues.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::proxy::mappers::openai::{
    collect_chat_response, create_chat_sse_stream, transform_chat_request, ChatCompletionRequest,
    RequestEnvelope,
};
use crate::proxy::server::AppState;

const MAX_RETRY_ATTEMPTS: usize = 5;

/// What an upstream status means for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamClass {
    Success,
    RateLimited,
    PermissionDenied,
    /// 4xx other than 429/403: caller problem, surfaced without retry.
    ClientError,
    /// 5xx: upstream fault, rotate and retry.
    ServerError,
}

pub fn classify_upstream_status(status: StatusCode) -> UpstreamClass {
    if status.is_success() {
        UpstreamClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        UpstreamClass::RateLimited
    } else if status == StatusCode::FORBIDDEN {
        UpstreamClass::PermissionDenied
    } else if status.is_client_error() {
        UpstreamClass::ClientError
    } else {
        UpstreamClass::ServerError
    }
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let request: ChatCompletionRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid request: {}", e) })),
            )
                .into_response();
        }
    };

    let mut last_error = String::from("no attempt performed");

    for attempt in 0..MAX_RETRY_ATTEMPTS {
        let account = match state.pool.acquire().await {
            Ok(account) => account,
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "Failed to get account");
                last_error = e.to_string();
                tokio::time::sleep(std::time::Duration::from_secs((attempt + 1) as u64)).await;
                continue;
            }
        };

        info!(
            account_id = %account.account_id,
            email = %account.email,
            attempt = attempt + 1,
            max_retries = MAX_RETRY_ATTEMPTS,
            "Using account for request"
        );

        let envelope = RequestEnvelope::generate();
        let vendor_body = transform_chat_request(&request, &envelope);

        let response = match state
            .upstream
            .stream_generate_content(&account.access_token, &vendor_body)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    account_id = %account.account_id,
                    email = %account.email,
                    attempt = attempt + 1,
                    error = %e,
                    "Upstream request failed"
                );
                let _ = state
                    .pool
                    .record_failure(&account.account_id, &e.to_string())
                    .await;
                last_error = e.to_string();
                continue;
            }
        };

        let status = response.status();
        match classify_upstream_status(status) {
            UpstreamClass::RateLimited => {
                warn!(
                    account_id = %account.account_id,
                    email = %account.email,
                    attempt = attempt + 1,
                    rate_limit_count = account.error_tracking.rate_limit_count + 1,
                    "Rate limit encountered"
                );
                let _ = state.pool.record_rate_limit(&account.account_id).await;
                last_error = "rate limit exceeded".to_string();
                continue;
            }
            UpstreamClass::PermissionDenied => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    account_id = %account.account_id,
                    email = %account.email,
                    error = %body,
                    "Permission denied - disabling account"
                );
                let _ = state
                    .pool
                    .record_permission_denied(&account.account_id)
                    .await;
                last_error = "permission denied".to_string();
                continue;
            }
            UpstreamClass::ClientError => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    account_id = %account.account_id,
                    email = %account.email,
                    status = status.as_u16(),
                    body = %body,
                    attempt = attempt + 1,
                    "Upstream returned client error"
                );
                let _ = state
                    .pool
                    .record_failure(
                        &account.account_id,
                        &format!("HTTP {}: {}", status.as_u16(), body),
                    )
                    .await;
                return (
                    status,
                    Json(json!({ "error": "Upstream API error", "details": body })),
                )
                    .into_response();
            }
            UpstreamClass::ServerError => {
                let body = response.text().await.unwrap_or_default();
                warn!(
                    account_id = %account.account_id,
                    email = %account.email,
                    status = status.as_u16(),
                    body = %body,
                    attempt = attempt + 1,
                    "Upstream returned server error"
                );
                let message = format!("HTTP {}: {}", status.as_u16(), body);
                let _ = state
                    .pool
                    .record_failure(&account.account_id, &message)
                    .await;
                last_error = message;
                continue;
            }
            UpstreamClass::Success => {}
        }

        info!(
            account_id = %account.account_id,
            email = %account.email,
            attempt = attempt + 1,
            "Request successful"
        );
        let _ = state.pool.record_success(&account.account_id).await;

        let upstream_stream = Box::pin(response.bytes_stream());

        if request.stream {
            let sse = create_chat_sse_stream(
                upstream_stream,
                request.model.clone(),
                state.usage.clone(),
                account.account_id.clone(),
            );
            return Response::builder()
                .header("Content-Type", "text/event-stream")
                .header("Cache-Control", "no-cache")
                .header("Connection", "keep-alive")
                .body(Body::from_stream(sse))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }

        match collect_chat_response(upstream_stream, &request.model).await {
            Ok((chat_response, raw_usage)) => {
                state
                    .usage
                    .record(
                        &account.account_id,
                        raw_usage.input_tokens,
                        raw_usage.output_tokens,
                    )
                    .await;
                return (StatusCode::OK, Json(chat_response)).into_response();
            }
            Err(e) => {
                error!(
                    account_id = %account.account_id,
                    error = %e,
                    "Failed to aggregate upstream stream"
                );
                let _ = state.pool.record_failure(&account.account_id, &e).await;
                last_error = e;
                continue;
            }
        }
    }

    error!(
        attempts = MAX_RETRY_ATTEMPTS,
        error = %last_error,
        "All retry attempts exhausted"
    );
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "Service unavailable after retries",
            "details": last_error,
            "retries": MAX_RETRY_ATTEMPTS,
        })),
    )
        .into_response()
}

/// Union of the model maps across all enabled accounts, deduplicated by id.
pub async fn handle_list_models(State(state): State<AppState>) -> Response {
    Json(build_models_response(&state.pool)).into_response()
}

fn build_models_response(pool: &Arc<crate::proxy::token_manager::AccountPool>) -> Value {
    let mut models: BTreeMap<String, Value> = BTreeMap::new();
    if let Ok(ids) = pool.store().list() {
        for id in ids {
            let Ok(account) = pool.store().load(&id) else {
                continue;
            };
            if !account.enable {
                continue;
            }
            for (model_id, info) in &account.models {
                models.insert(
                    model_id.clone(),
                    json!({
                        "id": model_id,
                        "object": "model",
                        "owned_by": info.owned_by,
                    }),
                );
            }
        }
    }
    json!({
        "object": "list",
        "data": models.into_values().collect::<Vec<_>>(),
    })
}
