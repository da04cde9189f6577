//! Cache-aside facade
//!
//! Derives keys, reads and writes the shared store, and routes misses through
//! the [`Singleflight`] coordinator.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::singleflight::{read_cached, write_cached, Singleflight, SingleflightConfig};
use crate::domain::cache::{
    CacheKeyGenerator, CacheKeyParams, CacheOptions, CacheStore, DefaultKeyGenerator, LoadError,
};
use crate::domain::DomainError;
use crate::infrastructure::lease::{LeaseManager, DEFAULT_RENEW_DIVISOR};
use crate::infrastructure::observability::metrics;

/// Configuration for the cache service
#[derive(Debug, Clone)]
pub struct CacheServiceConfig {
    /// Options used by the calls that do not take their own
    pub defaults: CacheOptions,
    /// Waiter polling behaviour
    pub singleflight: SingleflightConfig,
    /// Lease renewals per lock TTL
    pub renew_divisor: u32,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            defaults: CacheOptions::default(),
            singleflight: SingleflightConfig::default(),
            renew_divisor: DEFAULT_RENEW_DIVISOR,
        }
    }
}

impl CacheServiceConfig {
    pub fn with_defaults(mut self, defaults: CacheOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_singleflight(mut self, singleflight: SingleflightConfig) -> Self {
        self.singleflight = singleflight;
        self
    }

    pub fn with_renew_divisor(mut self, renew_divisor: u32) -> Self {
        self.renew_divisor = renew_divisor;
        self
    }
}

/// Cache-aside operations over a shared store
#[derive(Debug, Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    key_generator: Arc<dyn CacheKeyGenerator>,
    singleflight: Singleflight,
    defaults: CacheOptions,
}

impl CacheService {
    /// Creates a cache service with default options
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_config(store, CacheServiceConfig::default())
    }

    /// Creates a cache service with custom config
    pub fn with_config(store: Arc<dyn CacheStore>, config: CacheServiceConfig) -> Self {
        let leases = LeaseManager::new(store.clone()).with_renew_divisor(config.renew_divisor);
        let singleflight = Singleflight::with_config(store.clone(), leases, config.singleflight);

        Self {
            store,
            key_generator: Arc::new(DefaultKeyGenerator::new()),
            singleflight,
            defaults: config.defaults,
        }
    }

    /// Replaces the key generator
    pub fn with_key_generator(mut self, key_generator: Arc<dyn CacheKeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn defaults(&self) -> &CacheOptions {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Derives the store key for `params`
    pub fn key_for(
        &self,
        params: &CacheKeyParams,
        options: &CacheOptions,
    ) -> Result<String, DomainError> {
        self.key_generator.generate(params, &options.exclusions)
    }

    /// Reads a cached value; store failures read as a miss
    pub async fn get<V>(&self, params: &CacheKeyParams) -> Result<Option<V>, DomainError>
    where
        V: DeserializeOwned,
    {
        self.get_with(params, &self.defaults).await
    }

    pub async fn get_with<V>(
        &self,
        params: &CacheKeyParams,
        options: &CacheOptions,
    ) -> Result<Option<V>, DomainError>
    where
        V: DeserializeOwned,
    {
        let key = self.key_for(params, options)?;
        Ok(self.lookup(&key).await)
    }

    /// Writes a value; returns whether it was stored
    ///
    /// Empty values are skipped unless `ignore_null` is off. A failed write is
    /// logged and reported as `false`.
    pub async fn set<V>(&self, params: &CacheKeyParams, value: &V) -> Result<bool, DomainError>
    where
        V: Serialize + ?Sized,
    {
        self.set_with(params, value, &self.defaults).await
    }

    pub async fn set_with<V>(
        &self,
        params: &CacheKeyParams,
        value: &V,
        options: &CacheOptions,
    ) -> Result<bool, DomainError>
    where
        V: Serialize + ?Sized,
    {
        let key = self.key_for(params, options)?;
        Ok(write_cached(self.store.as_ref(), &key, value, options).await)
    }

    /// Removes a cached value; returns whether the key existed
    pub async fn delete(&self, params: &CacheKeyParams) -> Result<bool, DomainError> {
        self.delete_with(params, &self.defaults).await
    }

    pub async fn delete_with(
        &self,
        params: &CacheKeyParams,
        options: &CacheOptions,
    ) -> Result<bool, DomainError> {
        let key = self.key_for(params, options)?;
        Ok(self.remove(&key).await)
    }

    /// Reads a value and invalidates it, for one-shot entries
    pub async fn take<V>(&self, params: &CacheKeyParams) -> Result<Option<V>, DomainError>
    where
        V: DeserializeOwned,
    {
        self.take_with(params, &self.defaults).await
    }

    pub async fn take_with<V>(
        &self,
        params: &CacheKeyParams,
        options: &CacheOptions,
    ) -> Result<Option<V>, DomainError>
    where
        V: DeserializeOwned,
    {
        let key = self.key_for(params, options)?;

        let value = self.lookup(&key).await;

        // Only the caller whose delete removed the entry gets the value
        match value {
            Some(value) if self.remove(&key).await => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Returns the cached value, or loads it once across all callers
    pub async fn get_or_load<V, E, F, Fut>(
        &self,
        params: &CacheKeyParams,
        loader: F,
    ) -> Result<V, LoadError<E>>
    where
        V: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.get_or_load_with(params, &self.defaults, loader).await
    }

    pub async fn get_or_load_with<V, E, F, Fut>(
        &self,
        params: &CacheKeyParams,
        options: &CacheOptions,
        loader: F,
    ) -> Result<V, LoadError<E>>
    where
        V: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = self.key_for(params, options).map_err(LoadError::Encoding)?;

        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }

        let lock_key = self.key_generator.lock_key(&key);

        self.singleflight
            .load(&key, &lock_key, options, loader)
            .await
            .map_err(LoadError::Loader)
    }

    async fn lookup<V>(&self, key: &str) -> Option<V>
    where
        V: DeserializeOwned,
    {
        let value = read_cached(self.store.as_ref(), key).await;

        if value.is_some() {
            tracing::debug!(key = %key, "Cache hit");
            metrics::record_cache_hit();
        } else {
            tracing::debug!(key = %key, "Cache miss");
            metrics::record_cache_miss();
        }

        value
    }

    async fn remove(&self, key: &str) -> bool {
        match self.store.delete(key).await {
            Ok(true) => {
                tracing::info!(key = %key, "Cache deleted");
                true
            }
            Ok(false) => {
                tracing::info!(key = %key, "Cache key not found for deletion");
                false
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache delete failed");
                metrics::record_store_error("delete");
                false
            }
        }
    }
}
