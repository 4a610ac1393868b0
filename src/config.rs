//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::capability::MIN_SECRET_LEN;
use crate::gateway::DEFAULT_BASE_URL;
use crate::handlers::{ReservationSettings, SettlementSettings};
use crate::retry::RetryPolicy;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Key material for booking tokens
    pub token_secret: String,

    /// Lifetime written into booking tokens
    pub reservation_token_ttl_secs: i64,

    /// Maximum booking token age accepted when paying
    pub settlement_token_ttl_secs: i64,

    /// Payment gateway API root
    pub gateway_base_url: String,

    /// Per-request gateway timeout
    pub gateway_timeout_secs: u64,

    /// Attempts per gateway call on transient failures
    pub gateway_max_attempts: u32,

    /// Attempts per reservation commit on serialization conflicts
    pub reservation_max_attempts: u32,

    /// Age after which a pending settlement may be taken over
    pub settlement_stale_after_secs: i64,

    /// Age after which unpaid reservations are expired
    pub reservation_hold_secs: i64,

    /// Expiry sweep period
    pub expiry_sweep_interval_secs: u64,

    /// `json` or `text`
    pub log_format: String,
}

fn parsed<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parsed("DATABASE_MAX_CONNECTIONS", "10")?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parsed("PORT", "3000")?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let token_secret =
            env::var("TOKEN_SECRET").map_err(|_| ConfigError::MissingEnv("TOKEN_SECRET"))?;
        if token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue("TOKEN_SECRET"));
        }

        let config = Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            token_secret,
            reservation_token_ttl_secs: parsed("RESERVATION_TOKEN_TTL_SECS", "3600")?,
            settlement_token_ttl_secs: parsed("SETTLEMENT_TOKEN_TTL_SECS", "590")?,
            gateway_base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            gateway_timeout_secs: parsed("GATEWAY_TIMEOUT_SECS", "10")?,
            gateway_max_attempts: parsed("GATEWAY_MAX_ATTEMPTS", "3")?,
            reservation_max_attempts: parsed("RESERVATION_MAX_ATTEMPTS", "3")?,
            settlement_stale_after_secs: parsed("SETTLEMENT_STALE_AFTER_SECS", "300")?,
            reservation_hold_secs: parsed("RESERVATION_HOLD_SECS", "900")?,
            expiry_sweep_interval_secs: parsed("EXPIRY_SWEEP_INTERVAL_SECS", "60")?,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation_token_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue("RESERVATION_TOKEN_TTL_SECS"));
        }
        if self.settlement_token_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue("SETTLEMENT_TOKEN_TTL_SECS"));
        }
        if self.gateway_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_MAX_ATTEMPTS"));
        }
        if self.reservation_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RESERVATION_MAX_ATTEMPTS"));
        }
        if self.settlement_stale_after_secs < 0 {
            return Err(ConfigError::InvalidValue("SETTLEMENT_STALE_AFTER_SECS"));
        }
        // The sweep must not expire tickets a buyer still holds a valid token for
        if self.reservation_hold_secs <= 0
            || self.reservation_hold_secs < self.settlement_token_ttl_secs
        {
            return Err(ConfigError::InvalidValue("RESERVATION_HOLD_SECS"));
        }
        if self.expiry_sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("EXPIRY_SWEEP_INTERVAL_SECS"));
        }
        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn reservation_settings(&self) -> ReservationSettings {
        ReservationSettings {
            token_ttl: chrono::Duration::seconds(self.reservation_token_ttl_secs),
            commit_retry: RetryPolicy::default().with_max_attempts(self.reservation_max_attempts),
        }
    }

    pub fn settlement_settings(&self) -> SettlementSettings {
        SettlementSettings {
            token_ttl: chrono::Duration::seconds(self.settlement_token_ttl_secs),
            gateway_retry: RetryPolicy {
                max_attempts: self.gateway_max_attempts,
                initial_delay: std::time::Duration::from_millis(200),
                ..RetryPolicy::default()
            },
            store_retry: RetryPolicy::default().with_max_attempts(self.reservation_max_attempts),
            stale_after: chrono::Duration::seconds(self.settlement_stale_after_secs),
        }
    }

    pub fn reservation_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_hold_secs)
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_max_connections", &self.database_max_connections)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("token_secret", &"[REDACTED]")
            .field("gateway_base_url", &self.gateway_base_url)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
