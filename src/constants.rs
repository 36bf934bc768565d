//! Fixed vendor parameters for the Antigravity cloud-code upstream.
//!
//! Everything here is part of the upstream contract and must not be made
//! configurable: the OAuth client pair and scopes are owned by the vendor, and
//! the stop sequences / thinking budget are what the upstream expects from the
//! Antigravity agent surface.

use std::sync::LazyLock;

pub const ANTIGRAVITY_VERSION: &str = "1.11.3";

pub static USER_AGENT: LazyLock<String> = LazyLock::new(|| {
    format!(
        "antigravity/{} {}/{}",
        ANTIGRAVITY_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
});

pub const CLOUDCODE_HOST: &str = "daily-cloudcode-pa.sandbox.googleapis.com";
pub const STREAM_GENERATE_URL: &str =
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:streamGenerateContent?alt=sse";
pub const FETCH_MODELS_URL: &str =
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:fetchAvailableModels";

pub const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const OAUTH_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const OAUTH_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const OAUTH_CLIENT_SECRET: &str = "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";

pub const OAUTH_SCOPES: &str = concat!(
    "https://www.googleapis.com/auth/cloud-platform ",
    "https://www.googleapis.com/auth/userinfo.email ",
    "https://www.googleapis.com/auth/userinfo.profile ",
    "https://www.googleapis.com/auth/cclog ",
    "https://www.googleapis.com/auth/experimentsandconfigs"
);

/// Agent boundary markers the upstream must never echo back.
pub const STOP_SEQUENCES: [&str; 5] = [
    "<|user|>",
    "<|bot|>",
    "<|context_request|>",
    "<|endoftext|>",
    "<|end_of_turn|>",
];

pub const THINKING_BUDGET: i64 = 8192;
/// Room reserved for the visible answer when thinking eats into the budget.
pub const ANSWER_RESERVE_TOKENS: i64 = 4096;

/// Word lists for the synthetic project pseudo-id ("useful-wave-41023").
pub const PROJECT_ADJECTIVES: [&str; 5] = ["useful", "bright", "swift", "calm", "bold"];
pub const PROJECT_NOUNS: [&str; 5] = ["fuze", "wave", "spark", "flow", "core"];
