//! OAuth login initiation and the authorization-code callback.
//!
//! `/oauth-login` registers a fresh CSPRNG state and redirects the browser to
//! the vendor's consent page; `/oauth-callback` only accepts codes carrying a
//! state registered within the last ten minutes. A successful callback
//! persists the new account and renders a small confirmation page.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::modules::auth::oauth::generate_state;
use crate::proxy::server::AppState;

const STATE_TTL_SECS: i64 = 600;

/// Pending login states with their creation time. Expired entries are pruned
/// on every touch, so the map stays bounded by login traffic.
#[derive(Debug, Default)]
pub struct OAuthStateRegistry {
    states: Mutex<HashMap<String, i64>>,
}

impl OAuthStateRegistry {
    pub fn insert(&self, state: String) {
        let now = chrono::Utc::now().timestamp();
        if let Ok(mut states) = self.states.lock() {
            states.retain(|_, created| now - *created < STATE_TTL_SECS);
            states.insert(state, now);
        }
    }

    /// Consume a state; returns false for unknown or expired values.
    pub fn take(&self, state: &str) -> bool {
        let now = chrono::Utc::now().timestamp();
        if let Ok(mut states) = self.states.lock() {
            states.retain(|_, created| now - *created < STATE_TTL_SECS);
            states.remove(state).is_some()
        } else {
            false
        }
    }
}

pub async fn handle_oauth_login(State(state): State<AppState>) -> Response {
    let login_state = generate_state();
    state.oauth_states.insert(login_state.clone());

    match state.oauth.build_auth_url(&login_state) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to build authorization URL");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn handle_oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        let message = query.error.unwrap_or_else(|| "no authorization code".to_string());
        error!(error = %message, "OAuth callback error");
        return result_page("Authorization failed", &message).into_response();
    };

    let bound = query
        .state
        .as_deref()
        .map(|s| state.oauth_states.take(s))
        .unwrap_or(false);
    if !bound {
        warn!("OAuth callback with missing or unknown state");
        return (StatusCode::BAD_REQUEST, "Invalid state").into_response();
    }

    let token = match state.oauth.exchange(&code).await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Failed to exchange authorization code");
            return result_page("Authorization failed", "could not obtain an access token")
                .into_response();
        }
    };

    let account = match state.oauth.create_account(token).await {
        Ok(account) => account,
        Err(e) => {
            error!(error = %e, "Failed to build account from grant");
            return result_page("Authorization failed", "could not fetch the user profile")
                .into_response();
        }
    };

    if let Err(e) = state.pool.store().save(&account) {
        error!(account_id = %account.account_id, error = %e, "Failed to save account");
        return result_page("Save failed", "could not persist the account").into_response();
    }

    info!(
        account_id = %account.account_id,
        email = %account.email,
        models = account.models.len(),
        "OAuth login successful"
    );

    success_page(&account.email, &account.account_id, account.models.len()).into_response()
}

fn result_page(title: &str, detail: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n\
         <body style=\"font-family: sans-serif; padding: 48px; text-align: center;\">\n\
         <h1>{title}</h1>\n<p>{detail}</p>\n\
         <p>You can close this window and return to the terminal.</p>\n\
         </body>\n</html>"
    ))
}

fn success_page(email: &str, account_id: &str, model_count: usize) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Login Successful</title></head>\n\
         <body style=\"font-family: sans-serif; padding: 48px; text-align: center;\">\n\
         <h1>Login Successful</h1>\n\
         <p>Email: <strong>{email}</strong></p>\n\
         <p>Account ID: <code>{account_id}</code></p>\n\
         <p>Models available: <strong>{model_count}</strong></p>\n\
         <p>You can close this window and return to the terminal.</p>\n\
         </body>\n</html>"
    ))
}
