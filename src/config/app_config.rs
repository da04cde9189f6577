use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::{CacheOptions, DEFAULT_EXPIRE, DEFAULT_LOCK_TIMEOUT, MAX_TTL};
use crate::domain::DomainError;
use crate::infrastructure::cache::{CacheStoreConfig, StoreType};
use crate::infrastructure::lease::DEFAULT_RENEW_DIVISOR;
use crate::infrastructure::observability::MetricsConfig;
use crate::infrastructure::services::{
    CacheServiceConfig, SingleflightConfig, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_GRACE,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Store selection and cache-aside defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub store: StoreType,
    pub redis_url: Option<String>,
    /// Prefix applied to every key in a shared Redis
    pub namespace: Option<String>,
    pub max_capacity: Option<u64>,
    pub connection_timeout_secs: u64,
    pub default_expire_secs: u64,
    pub ignore_null: bool,
    pub lock_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub wait_grace_ms: u64,
    pub renew_divisor: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            store: StoreType::default(),
            redis_url: None,
            namespace: None,
            max_capacity: Some(10_000),
            connection_timeout_secs: 5,
            default_expire_secs: DEFAULT_EXPIRE.as_secs(),
            ignore_null: true,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            wait_grace_ms: DEFAULT_WAIT_GRACE.as_millis() as u64,
            renew_divisor: DEFAULT_RENEW_DIVISOR,
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.store == StoreType::Redis
            && self.redis_url.as_deref().is_none_or(|url| url.trim().is_empty())
        {
            return Err(DomainError::configuration(
                "cache.redis_url is required when cache.store is redis",
            ));
        }

        if self.default_expire_secs == 0 {
            return Err(DomainError::configuration(
                "cache.default_expire_secs must be greater than 0",
            ));
        }

        if self.lock_timeout_secs == 0 {
            return Err(DomainError::configuration(
                "cache.lock_timeout_secs must be greater than 0",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(DomainError::configuration(
                "cache.poll_interval_ms must be greater than 0",
            ));
        }

        let max_secs = MAX_TTL.as_secs();
        let max_ms = MAX_TTL.as_millis() as u64;
        for (field, value, max) in [
            ("cache.default_expire_secs", self.default_expire_secs, max_secs),
            ("cache.lock_timeout_secs", self.lock_timeout_secs, max_secs),
            ("cache.connection_timeout_secs", self.connection_timeout_secs, max_secs),
            ("cache.poll_interval_ms", self.poll_interval_ms, max_ms),
            ("cache.wait_grace_ms", self.wait_grace_ms, max_ms),
        ] {
            if value > max {
                return Err(DomainError::configuration(format!(
                    "{} must be at most {}",
                    field, max
                )));
            }
        }

        Ok(())
    }

    pub fn store_config(&self) -> CacheStoreConfig {
        CacheStoreConfig {
            store_type: self.store,
            redis_url: self.redis_url.clone(),
            namespace: self.namespace.clone(),
            max_capacity: self.max_capacity,
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
        }
    }

    /// Options used by calls that do not pass their own
    pub fn default_options(&self) -> CacheOptions {
        CacheOptions::default()
            .with_expire(Duration::from_secs(self.default_expire_secs))
            .with_ignore_null(self.ignore_null)
            .with_lock_timeout(Duration::from_secs(self.lock_timeout_secs))
    }

    pub fn service_config(&self) -> CacheServiceConfig {
        CacheServiceConfig::default()
            .with_defaults(self.default_options())
            .with_singleflight(
                SingleflightConfig::default()
                    .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
                    .with_wait_grace(Duration::from_millis(self.wait_grace_ms)),
            )
            .with_renew_divisor(self.renew_divisor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Loads `.env`, `config/default`, `config/local` and `APP__*` variables,
    /// later sources overriding earlier ones
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
