//! Application configuration tree.
//!
//! Persisted as pretty JSON under the data directory; every section has serde
//! defaults so a partial file keeps working across upgrades.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Static caller key. Empty disables the static match and leaves only the
    /// dynamic key store.
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8045
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl StorageConfig {
    pub fn accounts_dir(&self) -> PathBuf {
        self.data_dir.join("accounts")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn usage_dir(&self) -> PathBuf {
        self.data_dir.join("usage")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = serde_json::from_str("{}").expect("empty config parses");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8045);
        assert_eq!(config.logging.level, "info");
        assert!(config.security.api_key.is_empty());
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn storage_dirs_derive_from_data_dir() {
        let storage = StorageConfig::with_data_dir("/tmp/skybridge");
        assert_eq!(storage.accounts_dir(), PathBuf::from("/tmp/skybridge/accounts"));
        assert_eq!(storage.keys_dir(), PathBuf::from("/tmp/skybridge/keys"));
        assert_eq!(storage.usage_dir(), PathBuf::from("/tmp/skybridge/usage"));
    }
}
