//! Axum application state, route table and listener.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;
use crate::modules::auth::oauth::OAuthClient;
use crate::proxy::handlers;
use crate::proxy::handlers::oauth_callback::OAuthStateRegistry;
use crate::proxy::middleware::{api_key_auth_middleware, AuthGate};
use crate::proxy::token_manager::AccountPool;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::usage::UsageRecorder;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub upstream: Arc<UpstreamClient>,
    pub usage: Arc<UsageRecorder>,
    pub oauth: Arc<OAuthClient>,
    pub oauth_states: Arc<OAuthStateRegistry>,
    pub auth: Arc<AuthGate>,
}

pub fn build_router(state: AppState) -> Router {
    // The /v1 surface requires a caller key; everything else is open
    // (the OAuth callback is state-bound instead).
    let api_routes = Router::new()
        .route(
            "/v1/chat/completions",
            post(handlers::openai::handle_chat_completions),
        )
        .route("/v1/models", get(handlers::openai::handle_list_models))
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            api_key_auth_middleware,
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ping", get(ping_handler))
        .route(
            "/oauth-login",
            get(handlers::oauth_callback::handle_oauth_login),
        )
        .route(
            "/oauth-callback",
            get(handlers::oauth_callback::handle_oauth_callback),
        )
        .merge(api_routes)
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(config: &AppConfig, state: AppState) -> AppResult<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Config(format!("address {} binding failed: {}", addr, e)))?;

    info!("Proxy server started at http://{}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Io)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

async fn root_handler() -> impl IntoResponse {
    "ok"
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ping_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "message": "pong" })))
}
