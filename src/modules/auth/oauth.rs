//! OAuth client for the vendor's Google-hosted identity surface.
//!
//! The client id/secret pair and scope set are fixed vendor property (see
//! `constants`). The callback is served by the main proxy port at
//! `/oauth-callback`, so the redirect URI is derived from the configured
//! server port.

use std::collections::HashMap;

use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::constants::{
    FETCH_MODELS_URL, OAUTH_AUTH_URL, OAUTH_CLIENT_ID, OAUTH_CLIENT_SECRET, OAUTH_SCOPES,
    OAUTH_TOKEN_URL, OAUTH_USERINFO_URL, USER_AGENT,
};
use crate::error::{AppError, AppResult};
use crate::models::{Account, ModelInfo};

/// Refresh failures are classified because they drive different pool
/// transitions: 429 backs the account off, 403 disables it, anything else is
/// a generic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    RateLimited,
    PermissionDenied,
    Other(String),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::RateLimited => write!(f, "token endpoint rate limited"),
            RefreshError::PermissionDenied => write!(f, "token endpoint permission denied"),
            RefreshError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserInfo {
    /// Display name, falling back to the email when the profile has none.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self.email.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(server_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent(USER_AGENT.as_str())
            .build()
            .expect("failed to build OAuth HTTP client");
        Self {
            http,
            redirect_uri: format!("http://localhost:{}/oauth-callback", server_port),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Standard authorization-code URL with offline access and forced consent
    /// (without it Google withholds the refresh token on re-authorization).
    pub fn build_auth_url(&self, state: &str) -> AppResult<String> {
        let params = [
            ("client_id", OAUTH_CLIENT_ID),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", OAUTH_SCOPES),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ];
        let url = url::Url::parse_with_params(OAUTH_AUTH_URL, &params)
            .map_err(|e| AppError::OAuth(format!("invalid auth URL: {}", e)))?;
        Ok(url.to_string())
    }

    pub async fn exchange(&self, code: &str) -> AppResult<TokenResponse> {
        let params = [
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("token exchange request failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::OAuth(format!("token exchange failed: {}", body)));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AppError::OAuth(format!("token parsing failed: {}", e)))?;
        if token.refresh_token.is_none() {
            warn!("Google did not return a refresh_token; the account will not survive expiry");
        }
        Ok(token)
    }

    /// Refresh grant. A new refresh token, when present in the response, must
    /// replace the stored one (the caller owns that write).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, RefreshError> {
        let params = [
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| RefreshError::Other(format!("refresh request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RefreshError::RateLimited);
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(RefreshError::PermissionDenied);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Other(format!(
                "refresh failed: HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RefreshError::Other(format!("refresh data parsing failed: {}", e)))
    }

    pub async fn fetch_user_info(&self, access_token: &str) -> AppResult<UserInfo> {
        let response = self
            .http
            .get(OAUTH_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::OAuth(format!("user info request failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::OAuth(format!("failed to get user info: {}", body)));
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| AppError::OAuth(format!("user info parsing failed: {}", e)))
    }

    /// Model metadata is best-effort: any non-2xx or decode failure yields an
    /// empty map so login and refresh never fail on it. The endpoint responds
    /// gzip-encoded; reqwest's gzip support decodes it transparently.
    pub async fn fetch_models(&self, access_token: &str) -> HashMap<String, ModelInfo> {
        let response = match self
            .http
            .post(FETCH_MODELS_URL)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to fetch models");
                return HashMap::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                status = response.status().as_u16(),
                "Failed to fetch models - non-2xx response"
            );
            return HashMap::new();
        }

        #[derive(Deserialize)]
        struct ModelsEnvelope {
            #[serde(default)]
            models: Option<HashMap<String, serde_json::Value>>,
        }

        let envelope = match response.json::<ModelsEnvelope>().await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to decode models response");
                return HashMap::new();
            }
        };

        let Some(models) = envelope.models else {
            warn!("Models endpoint returned no models field");
            return HashMap::new();
        };

        let list: HashMap<String, ModelInfo> = models
            .into_keys()
            .map(|id| (id.clone(), ModelInfo::new(id)))
            .collect();
        info!(count = list.len(), "Fetched models");
        list
    }

    /// Full post-authorization account construction: user info, best-effort
    /// model list, fresh record. The caller persists it.
    pub async fn create_account(&self, token: TokenResponse) -> AppResult<Account> {
        let user_info = self.fetch_user_info(&token.access_token).await?;
        let models = self.fetch_models(&token.access_token).await;

        let mut account = Account::new(
            generate_account_id(&user_info.email),
            user_info.email.clone(),
            user_info.display_name(),
            token.access_token,
            token.refresh_token.unwrap_or_default(),
            token.expires_in,
        );
        account.models = models;
        debug!(
            account_id = %account.account_id,
            email = %account.email,
            models = account.models.len(),
            "Constructed account from OAuth grant"
        );
        Ok(account)
    }
}

/// OAuth `state` parameter: 32 CSPRNG bytes, URL-safe base64.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Stable account identity: email plus a random hex suffix so re-login of the
/// same email creates a distinct record.
pub fn generate_account_id(email: &str) -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}_{}", email, suffix)
}
