mod account;
mod config;
mod key;

pub use account::{Account, ErrorTracking, ModelInfo, RefreshStatus, UsageStats};
pub use config::{AppConfig, LoggingConfig, SecurityConfig, ServerConfig, StorageConfig};
pub use key::{ApiKey, RateLimit};
