//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::net::SocketAddr;
use std::time::Duration;
use table_pool::{DatabaseConfig, SweeperConfig};

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:6969";

/// Default bot used in invite links
pub const DEFAULT_BOT_NAME: &str = "TablePoolBot";

/// Where table state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local; state is lost on restart
    Memory,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Storage backend
    pub storage: StorageBackend,
    /// Database configuration (ignored for the memory backend)
    pub database: DatabaseConfig,
    /// Telegram bot that invite links point at
    pub bot_name: String,
    /// Sweeper timing
    pub sweeper: SweeperConfig,
    /// Prometheus listener, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    /// Open one table per kind and fee at startup
    pub seed_pool: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// CLI overrides take precedence over `SERVER_BIND` and `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns error if an address cannot be parsed
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        use_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr(
                "SERVER_BIND",
                &std::env::var("SERVER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            )?,
        };

        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.database_url = url;
        }

        let storage = if use_memory || parse_env_or("USE_MEMORY_STORE", false) {
            StorageBackend::Memory
        } else {
            StorageBackend::Postgres
        };

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_addr("METRICS_BIND", &raw)?),
            _ => None,
        };

        let sweeper = SweeperConfig {
            interval: Duration::from_secs(parse_env_or("SWEEP_INTERVAL_SECS", 300)),
            stale_after: Duration::from_secs(parse_env_or("SWEEP_STALE_SECS", 600)),
        };

        Ok(ServerConfig {
            bind,
            storage,
            database,
            bot_name: std::env::var("TELEGRAM_BOT_NAME")
                .unwrap_or_else(|_| DEFAULT_BOT_NAME.to_string()),
            sweeper,
            metrics_bind,
            seed_pool: parse_env_or("SEED_POOL", true),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweeper.interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.sweeper.stale_after.is_zero() {
            return Err(ConfigError::Invalid {
                var: "SWEEP_STALE_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.bot_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "TELEGRAM_BOT_NAME".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        if self.storage == StorageBackend::Postgres && self.database.database_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                var: "DATABASE_URL".to_string(),
                hint: "Set DATABASE_URL or start with --memory".to_string(),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("Must differ from the server address ({})", self.bind),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn parse_addr(var: &str, raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        var: var.to_string(),
        reason: format!("'{raw}' is not a socket address: {e}"),
    })
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
