//! Cacheflight
//!
//! Cache-aside coordination in front of an expensive data source:
//! - Deterministic cache keys from a prefix and a call's arguments
//! - Redis and in-memory stores with atomic conditional operations
//! - Leases with background renewal, so one caller per key runs the loader
//! - Waiters that poll for the published value and fall back to loading
//!   themselves when the lease holder stalls
//! - A wrapper that turns any async function into a cached one

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use self::config::AppConfig;
pub use domain::cache::{
    CacheExt, CacheKeyGenerator, CacheKeyParams, CacheOptions, CacheStore, DefaultKeyGenerator,
    KeyExclusions, LoadError,
};
pub use domain::DomainError;
pub use infrastructure::cache::{CacheStoreConfig, CacheStoreFactory, StoreType};
pub use infrastructure::lease::{Lease, LeaseManager, LeaseStatus};
pub use infrastructure::services::{
    CacheService, CacheServiceConfig, CachedFn, KeyArgs, Singleflight, SingleflightConfig,
};

use tracing::info;

/// Create a cache service from configuration
pub async fn create_cache_service(config: &AppConfig) -> Result<CacheService, DomainError> {
    config.cache.validate()?;

    let store = CacheStoreFactory::new()
        .create(&config.cache.store_config())
        .await?;

    info!(
        store = %config.cache.store,
        default_expire_secs = config.cache.default_expire_secs,
        lock_timeout_secs = config.cache.lock_timeout_secs,
        "Cache service initialized"
    );

    Ok(CacheService::with_config(store, config.cache.service_config()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_cache_service_in_memory() {
        let config = AppConfig::default();

        let cache = tokio_test::assert_ok!(create_cache_service(&config).await);
        let params = CacheKeyParams::new("book").with_arg(&42);

        assert!(cache.set(&params, &"Dune").await.unwrap());
        let value: Option<String> = cache.get(&params).await.unwrap();
        assert_eq!(value.as_deref(), Some("Dune"));
    }

    #[tokio::test]
    async fn test_create_cache_service_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.cache.store = StoreType::Redis;

        let result = create_cache_service(&config).await;
        assert!(matches!(result, Err(DomainError::Configuration { .. })));
    }
}
