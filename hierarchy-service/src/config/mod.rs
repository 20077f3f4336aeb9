//! Configuration module for hierarchy-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a mutation waits for tenant or row locks.
    pub lock_timeout_ms: u64,
    /// Lifetime of a cached scope. Staleness is handled by the store's scope
    /// generation, so this only bounds memory. Zero disables the cache.
    pub scope_cache_ttl_seconds: u64,
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn scope_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.scope_cache_ttl_seconds)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            scope_cache_ttl_seconds: 30,
        }
    }
}

impl HierarchyConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let engine_defaults = EngineConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "hierarchy-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_seconds: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECONDS", 5)?,
            },
            engine: EngineConfig {
                lock_timeout_ms: parse_env("HIERARCHY_LOCK_TIMEOUT_MS", engine_defaults.lock_timeout_ms)?,
                scope_cache_ttl_seconds: parse_env(
                    "SCOPE_CACHE_TTL_SECONDS",
                    engine_defaults.scope_cache_ttl_seconds,
                )?,
            },
        })
    }
}

/// Read a numeric variable, falling back to `default` when unset. A value
/// that does not parse is an error rather than a silent default.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} must be a number, got '{}'", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
