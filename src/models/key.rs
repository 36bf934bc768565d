//! Caller credentials for the public API surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(default)]
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_ms: u64,
}

impl ApiKey {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            rate_limit: None,
            created_at: chrono::Utc::now().timestamp(),
            last_used_at: None,
            usage_count: 0,
        }
    }

    pub fn update_usage(&mut self) {
        self.last_used_at = Some(chrono::Utc::now().timestamp());
        self.usage_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_usage_bumps_count_and_timestamp() {
        let mut key = ApiKey::new("sk-test", "ci");
        assert_eq!(key.usage_count, 0);
        assert!(key.last_used_at.is_none());

        key.update_usage();
        key.update_usage();

        assert_eq!(key.usage_count, 2);
        assert!(key.last_used_at.is_some());
    }
}
