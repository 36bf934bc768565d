//! Account records and the per-account failure state machine.
//!
//! An [`Account`] is one upstream identity with its own quota. All transitions
//! on `refresh_status` / `error_tracking` live here so the pool, the OAuth
//! client and the proxy handlers share a single source of truth for cooldown
//! and backoff arithmetic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maximum generic-failure cooldown (seconds).
const MAX_FAILURE_COOLDOWN_SECS: i64 = 3600;
/// First 429 backoff (seconds); doubles on every subsequent 429.
const INITIAL_RATE_LIMIT_BACKOFF_SECS: i64 = 120;
/// 429 backoff ceiling (seconds).
const MAX_RATE_LIMIT_BACKOFF_SECS: i64 = 1800;
/// Tokens are refreshed when less than this remains before expiry.
const REFRESH_WINDOW_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub email: String,
    pub name: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds, as reported by the token endpoint.
    pub expires_in: i64,
    /// Milliseconds since epoch at which the current access token was issued.
    pub issued_at: i64,
    pub enable: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelInfo>,
    #[serde(default)]
    pub last_refresh_at: i64,
    #[serde(default)]
    pub refresh_status: RefreshStatus,
    #[serde(default)]
    pub usage: UsageStats,
    #[serde(default)]
    pub error_tracking: ErrorTracking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            owned_by: "google".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    #[default]
    Success,
    Failed,
    RateLimited,
    PermissionDenied,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub request_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorTracking {
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<i64>,
    /// Wall-clock second past which the account may be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_until: Option<i64>,
    #[serde(default)]
    pub rate_limit_count: u32,
    #[serde(default)]
    pub rate_limit_backoff_seconds: i64,
    #[serde(default)]
    pub is_permission_denied: bool,
}

impl Account {
    pub fn new(
        account_id: String,
        email: String,
        name: String,
        access_token: String,
        refresh_token: String,
        expires_in: i64,
    ) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        Self {
            account_id,
            email,
            name,
            access_token,
            refresh_token,
            expires_in,
            issued_at: now_ms,
            enable: true,
            models: HashMap::new(),
            last_refresh_at: now_ms,
            refresh_status: RefreshStatus::Success,
            usage: UsageStats::default(),
            error_tracking: ErrorTracking::default(),
        }
    }

    pub fn is_expired(&self) -> bool {
        if self.issued_at == 0 || self.expires_in == 0 {
            return true;
        }
        let expiry = self.issued_at / 1000 + self.expires_in;
        chrono::Utc::now().timestamp() > expiry
    }

    pub fn is_in_cooldown(&self) -> bool {
        match self.error_tracking.failed_until {
            Some(until) => chrono::Utc::now().timestamp() < until,
            None => false,
        }
    }

    /// Whether the token should be refreshed before the next upstream call.
    /// Disabled and cooled-down accounts are never refreshed.
    pub fn needs_refresh(&self) -> bool {
        if !self.enable || self.is_in_cooldown() {
            return false;
        }
        if self.issued_at == 0 || self.expires_in == 0 {
            return true;
        }
        let expiry = self.issued_at / 1000 + self.expires_in;
        expiry - chrono::Utc::now().timestamp() < REFRESH_WINDOW_SECS
    }

    /// Any successful upstream interaction clears all error state, including
    /// the rate-limit backoff.
    pub fn record_success(&mut self) {
        self.refresh_status = RefreshStatus::Success;
        self.last_refresh_at = chrono::Utc::now().timestamp_millis();
        self.error_tracking.consecutive_failures = 0;
        self.error_tracking.last_error = None;
        self.error_tracking.last_error_at = None;
        self.error_tracking.failed_until = None;
        self.error_tracking.rate_limit_count = 0;
        self.error_tracking.rate_limit_backoff_seconds = 0;
    }

    /// Generic failure (network, 5xx, token refresh error): exponential
    /// cooldown of 2^n seconds, capped at one hour.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.refresh_status = RefreshStatus::Failed;
        let tracking = &mut self.error_tracking;
        tracking.consecutive_failures += 1;
        tracking.last_error = Some(error.into());
        let now = chrono::Utc::now().timestamp();
        tracking.last_error_at = Some(now);

        let shift = tracking.consecutive_failures.min(12);
        let cooldown = (1i64 << shift).min(MAX_FAILURE_COOLDOWN_SECS);
        tracking.failed_until = Some(now + cooldown);
    }

    /// HTTP 429: adaptive backoff starting at 120 s, doubling per hit,
    /// capped at 30 minutes. Does not touch `consecutive_failures`.
    pub fn record_rate_limit(&mut self) {
        self.refresh_status = RefreshStatus::RateLimited;
        let tracking = &mut self.error_tracking;
        tracking.rate_limit_count += 1;
        tracking.last_error = Some("HTTP 429: Rate Limit Exceeded".to_string());
        let now = chrono::Utc::now().timestamp();
        tracking.last_error_at = Some(now);

        let backoff = if tracking.rate_limit_backoff_seconds > 0 {
            (tracking.rate_limit_backoff_seconds * 2).min(MAX_RATE_LIMIT_BACKOFF_SECS)
        } else {
            INITIAL_RATE_LIMIT_BACKOFF_SECS
        };
        tracking.rate_limit_backoff_seconds = backoff;
        tracking.failed_until = Some(now + backoff);
    }

    /// HTTP 403: the account lacks the required entitlements. Disabled
    /// immediately and never re-enabled automatically.
    pub fn record_permission_denied(&mut self) {
        self.refresh_status = RefreshStatus::PermissionDenied;
        self.enable = false;
        let tracking = &mut self.error_tracking;
        tracking.is_permission_denied = true;
        tracking.last_error = Some(
            "HTTP 403: Permission Denied - Account does not have required entitlements"
                .to_string(),
        );
        tracking.last_error_at = Some(chrono::Utc::now().timestamp());
    }

    pub fn record_usage(&mut self, input_tokens: i64, output_tokens: i64) {
        self.usage.request_count += 1;
        self.usage.input_tokens += input_tokens;
        self.usage.output_tokens += output_tokens;
        self.usage.total_tokens += input_tokens + output_tokens;
        self.usage.last_used_at = Some(chrono::Utc::now().timestamp_millis());
    }
}
