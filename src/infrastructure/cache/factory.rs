//! Cache store factory for runtime selection

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::cache::CacheStore;
use crate::domain::DomainError;

use super::in_memory::{InMemoryCacheConfig, InMemoryCacheStore};
use super::redis::{RedisCacheConfig, RedisCacheStore};

/// Supported store types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Process-local store using moka
    #[default]
    InMemory,
    /// Redis store, shared across processes
    Redis,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::InMemory => write!(f, "in_memory"),
            StoreType::Redis => write!(f, "redis"),
        }
    }
}

impl std::str::FromStr for StoreType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(StoreType::InMemory),
            "redis" => Ok(StoreType::Redis),
            _ => Err(DomainError::configuration(format!(
                "Unknown store type: {}. Valid types: in_memory, redis",
                s
            ))),
        }
    }
}

/// Configuration for the store factory
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    /// Type of store to create
    pub store_type: StoreType,
    /// Redis URL (required for Redis type)
    pub redis_url: Option<String>,
    /// Key prefix for namespacing (Redis only)
    pub namespace: Option<String>,
    /// Maximum capacity (in-memory only)
    pub max_capacity: Option<u64>,
    /// Connection timeout (Redis only)
    pub connection_timeout: Duration,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::InMemory,
            redis_url: None,
            namespace: None,
            max_capacity: Some(10_000),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheStoreConfig {
    /// Creates a new configuration for the in-memory store
    pub fn in_memory() -> Self {
        Self {
            store_type: StoreType::InMemory,
            ..Default::default()
        }
    }

    /// Creates a new configuration for the Redis store
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            store_type: StoreType::Redis,
            redis_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Sets the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the maximum capacity (in-memory only)
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    /// Sets the connection timeout (Redis only)
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Factory for creating store instances
#[derive(Debug, Default)]
pub struct CacheStoreFactory;

impl CacheStoreFactory {
    pub fn new() -> Self {
        Self
    }

    /// Creates a store based on configuration
    pub async fn create(&self, config: &CacheStoreConfig) -> Result<Arc<dyn CacheStore>, DomainError> {
        match config.store_type {
            StoreType::InMemory => {
                let mut in_memory_config = InMemoryCacheConfig::default();

                if let Some(capacity) = config.max_capacity {
                    in_memory_config = in_memory_config.with_max_capacity(capacity);
                }

                tracing::info!(
                    max_capacity = in_memory_config.max_capacity,
                    "Using in-memory cache store"
                );

                Ok(Arc::new(InMemoryCacheStore::with_config(in_memory_config)))
            }
            StoreType::Redis => {
                let url = config.redis_url.clone().ok_or_else(|| {
                    DomainError::configuration("Redis URL is required for Redis store type")
                })?;

                let mut redis_config =
                    RedisCacheConfig::new(url).with_connection_timeout(config.connection_timeout);

                if let Some(namespace) = &config.namespace {
                    redis_config = redis_config.with_key_prefix(namespace.clone());
                }

                let store = RedisCacheStore::new(redis_config).await?;
                tracing::info!(namespace = ?config.namespace, "Connected to Redis cache store");

                Ok(Arc::new(store))
            }
        }
    }
}
