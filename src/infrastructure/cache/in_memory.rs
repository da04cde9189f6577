//! In-memory cache store using moka
//!
//! Single-process only: the conditional operations are atomic per key within
//! this process, which makes the store a drop-in for tests and for
//! deployments that run one instance.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::ops::compute::{CompResult, Op};
use moka::Expiry;

use crate::domain::cache::{CacheStore, MAX_TTL};
use crate::domain::DomainError;

/// Configuration for in-memory store
#[derive(Debug, Clone)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_capacity: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
        }
    }
}

impl InMemoryCacheConfig {
    /// Sets the maximum number of entries
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }
}

/// Value stored in moka
#[derive(Debug, Clone)]
struct StoredValue {
    /// Serialized JSON value or lease token
    data: String,
    expires_at: Instant,
}

impl StoredValue {
    fn new(data: &str, ttl: Duration) -> Self {
        Self {
            data: data.to_string(),
            expires_at: Instant::now() + ttl.min(MAX_TTL),
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Evicts each entry at its own deadline
struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(updated_at))
    }
}

/// Thread-safe in-memory store backed by moka
#[derive(Debug)]
pub struct InMemoryCacheStore {
    cache: MokaCache<String, StoredValue>,
    config: InMemoryCacheConfig,
}

impl InMemoryCacheStore {
    /// Creates a new in-memory store with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryCacheConfig::default())
    }

    /// Creates a new in-memory store with the given configuration
    pub fn with_config(config: InMemoryCacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryExpiry)
            .build();

        Self { cache, config }
    }

    pub fn config(&self) -> &InMemoryCacheConfig {
        &self.config
    }

    async fn live(&self, key: &str) -> Option<StoredValue> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_live() => Some(entry),
            Some(_) => {
                self.cache.invalidate(key).await;
                None
            }
            None => None,
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError> {
        Ok(self.live(key).await.map(|entry| entry.data))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError> {
        self.cache
            .insert(key.to_string(), StoredValue::new(value, ttl))
            .await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().is_live() => Op::Nop,
                    _ => Op::Put(StoredValue::new(value, ttl)),
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(
            result,
            CompResult::Inserted(_) | CompResult::ReplacedWith(_)
        ))
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, DomainError> {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().is_live() && entry.value().data == expected => {
                        Op::Remove
                    }
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::Removed(_)))
    }

    async fn extend_if_matches(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError> {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().is_live() && entry.value().data == expected => {
                        Op::Put(StoredValue::new(expected, ttl))
                    }
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;

        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn delete(&self, key: &str) -> Result<bool, DomainError> {
        let existed = self
            .cache
            .remove(key)
            .await
            .is_some_and(|entry| entry.is_live());
        Ok(existed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError> {
        Ok(self
            .live(key)
            .await
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }
}
