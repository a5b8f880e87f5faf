//! Configuration management for Trellis services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (TRELLIS_ prefix, `__` between nested keys)
//! 2. Config file (`trellis.toml` by default), `[store]` table
//! 3. Defaults

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Connection settings for the relational backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// sqlx connection url (e.g. `sqlite://trellis.db?mode=rwc`, `sqlite::memory:`).
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default)]
    pub min_connections: u32,

    /// How long one pool acquisition may wait before it counts as a failed attempt.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

/// Bounded retry policy for transient backend failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts to obtain a pooled connection before giving up.
    #[serde(default = "default_attempts")]
    pub acquire_attempts: u32,

    /// Re-executions after a connection reset before surfacing a storage error.
    #[serde(default = "default_attempts")]
    pub reset_attempts: u32,
}

/// Per-viewer cache behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// How many in-flight loads a reader waits out before loading itself.
    #[serde(default = "default_coalesce_attempts")]
    pub coalesce_attempts: u32,

    /// Longest single wait on an in-flight load.
    #[serde(default = "default_coalesce_wait_ms")]
    pub coalesce_wait_ms: u64,
}

fn default_url() -> String {
    "sqlite://trellis.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_attempts() -> u32 {
    10
}

fn default_coalesce_attempts() -> u32 {
    8
}

fn default_coalesce_wait_ms() -> u64 {
    25
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_connections: 0,
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: default_attempts(),
            reset_attempts: default_attempts(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            coalesce_attempts: default_coalesce_attempts(),
            coalesce_wait_ms: default_coalesce_wait_ms(),
        }
    }
}

impl DatabaseConfig {
    /// A single-connection in-memory database. Every connection to `sqlite::memory:`
    /// opens a fresh database, so the pool must never grow past one.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig::in_memory(),
            ..Default::default()
        }
    }

    /// Load the `[store]` table from `<file_prefix>.toml` (optional) and
    /// `TRELLIS_STORE__...` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<StoreConfig>("store") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(StoreConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}
