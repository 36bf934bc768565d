//! Pooled HTTP client for the cloud-code upstream.
//!
//! One shared reqwest client carries all proxied calls: connection pooling,
//! a 120-second request deadline, the fixed Antigravity user agent, and
//! transparent gzip negotiation (reqwest adds Accept-Encoding and decodes
//! before the body stream reaches the SSE translators).

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::constants::{STREAM_GENERATE_URL, USER_AGENT};

pub struct UpstreamClient {
    client: Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(120))
            .pool_max_idle_per_host(16)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(USER_AGENT.as_str())
            .build()
            .expect("failed to build upstream HTTP client");
        Self { client }
    }

    pub async fn stream_generate_content(
        &self,
        access_token: &str,
        body: &Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(STREAM_GENERATE_URL)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
    }
}
