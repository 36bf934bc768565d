pub mod constants;
pub mod error;
pub mod models;
pub mod modules;
pub mod proxy;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::models::AppConfig;
use crate::modules::auth::oauth::OAuthClient;
use crate::modules::storage::{AccountStore, KeyStore, UsageStore};
use crate::modules::system::{config, logger, scheduler};
use crate::proxy::handlers::oauth_callback::OAuthStateRegistry;
use crate::proxy::middleware::AuthGate;
use crate::proxy::server::{self, AppState};
use crate::proxy::token_manager::AccountPool;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::usage::UsageRecorder;

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(key) = std::env::var("API_KEY") {
        if !key.trim().is_empty() {
            info!("Using API key from environment");
            config.security.api_key = key.trim().to_string();
        }
    }

    if let Ok(port) = std::env::var("PORT") {
        let trimmed = port.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<u16>() {
                Ok(parsed) if parsed > 0 => {
                    info!(port = parsed, "Using server port from environment");
                    config.server.port = parsed;
                }
                _ => warn!(value = %port, "Ignoring invalid PORT value"),
            }
        }
    }

    if let Ok(password) = std::env::var("WEB_PASSWORD") {
        if !password.trim().is_empty() {
            info!("Using admin password from environment");
            config.security.admin_password = Some(password);
        }
    }
}

async fn start_runtime() -> AppResult<()> {
    let data_dir = config::resolve_data_dir();
    let mut app_config = config::load_or_create(&data_dir)?;
    apply_env_overrides(&mut app_config);

    if app_config.security.api_key.is_empty() {
        warn!("No static API key configured; only dynamic keys will be accepted");
    }

    let account_store = AccountStore::new(app_config.storage.accounts_dir());
    let key_store = KeyStore::new(app_config.storage.keys_dir());
    let usage_store = UsageStore::new(app_config.storage.usage_dir());

    let oauth = Arc::new(OAuthClient::new(app_config.server.port));
    let pool = Arc::new(AccountPool::new(account_store, (*oauth).clone()));
    let usage = Arc::new(UsageRecorder::new(pool.clone(), usage_store));

    info!(accounts = pool.account_count(), "Account pool loaded");

    let refresh_scheduler = scheduler::start_refresh_scheduler(pool.clone());

    let state = AppState {
        pool,
        upstream: Arc::new(UpstreamClient::new()),
        usage,
        oauth,
        oauth_states: Arc::new(OAuthStateRegistry::default()),
        auth: Arc::new(AuthGate {
            api_key: app_config.security.api_key.clone(),
            key_store,
        }),
    };

    // Serves until ctrl-c, then winds the refresher down cleanly.
    let result = server::serve(&app_config, state).await;
    refresh_scheduler.stop().await;
    result
}

pub fn run() {
    let data_dir = config::resolve_data_dir();
    let log_level = config::load_or_create(&data_dir)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    logger::init_logger(&data_dir, &log_level);

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        if let Err(e) = start_runtime().await {
            error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests share the process environment; serialize them.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    struct ScopedEnvVar {
        key: &'static str,
        previous: Option<String>,
    }

    impl ScopedEnvVar {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for ScopedEnvVar {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn env_port_overrides_config_port() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let _port = ScopedEnvVar::set("PORT", "8145");

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.server.port, 8145);
    }

    #[test]
    fn invalid_env_port_is_ignored() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let _port = ScopedEnvVar::set("PORT", "not-a-port");

        let mut config = AppConfig::default();
        let before = config.server.port;
        apply_env_overrides(&mut config);
        assert_eq!(config.server.port, before);
    }

    #[test]
    fn env_api_key_and_password_override_config() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let _key = ScopedEnvVar::set("API_KEY", "sk-from-env");
        let _password = ScopedEnvVar::set("WEB_PASSWORD", "hunter2secret");

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.security.api_key, "sk-from-env");
        assert_eq!(config.security.admin_password.as_deref(), Some("hunter2secret"));
    }
}
