//! config.json loading with create-on-first-run.

use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AppConfig, StorageConfig};

const CONFIG_FILE: &str = "config.json";
const ADMIN_PASSWORD_LEN: usize = 16;

pub fn resolve_data_dir() -> PathBuf {
    match std::env::var("SKYBRIDGE_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => PathBuf::from("./data"),
    }
}

/// Load `config.json` from the data dir, creating it with defaults (and a
/// freshly generated admin password) when absent. The storage root always
/// follows the resolved data dir, not whatever an older file recorded.
pub fn load_or_create(data_dir: &Path) -> AppResult<AppConfig> {
    let path = data_dir.join(CONFIG_FILE);

    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let mut config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.storage = StorageConfig::with_data_dir(data_dir);
        if config.security.admin_password.is_none() {
            config.security.admin_password = Some(generate_admin_password());
            if let Err(e) = save(&path, &config) {
                warn!(error = %e, "Failed to persist generated admin password");
            }
        }
        return Ok(config);
    }

    let mut config = AppConfig::default();
    config.storage = StorageConfig::with_data_dir(data_dir);
    config.security.admin_password = Some(generate_admin_password());
    save(&path, &config)?;
    info!(path = %path.display(), "Created default config");
    Ok(config)
}

pub fn save(path: &Path, config: &AppConfig) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(fs::write(path, serde_json::to_string_pretty(config)?)?)
}

fn generate_admin_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ADMIN_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_creates_file_with_generated_password() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_or_create(dir.path()).expect("load");

        assert!(dir.path().join(CONFIG_FILE).exists());
        let password = config.security.admin_password.expect("password");
        assert_eq!(password.len(), ADMIN_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(config.storage.data_dir, dir.path());
    }

    #[test]
    fn generated_passwords_differ_between_runs() {
        assert_ne!(generate_admin_password(), generate_admin_password());
    }

    #[test]
    fn existing_file_is_loaded_and_password_preserved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = load_or_create(dir.path()).expect("first load");
        let second = load_or_create(dir.path()).expect("second load");
        assert_eq!(
            first.security.admin_password,
            second.security.admin_password
        );
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("write");
        let err = load_or_create(dir.path()).expect_err("must fail");
        assert!(matches!(err, AppError::Config(_)));
    }
}
