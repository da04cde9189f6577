//! Cache store trait definition

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Key-value store with TTL support and atomic conditional operations
///
/// Values are JSON strings so the trait stays dyn-compatible; use [`CacheExt`]
/// for typed access. Every method is a round trip to the backing store and
/// reports backend failures as [`DomainError::Cache`].
///
/// The conditional operations (`set_if_absent`, `delete_if_matches`,
/// `extend_if_matches`) must each execute as a single atomic step on the
/// store side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Gets a raw JSON value
    async fn get_raw(&self, key: &str) -> Result<Option<String>, DomainError>;

    /// Sets a raw JSON value with a TTL, overwriting any existing value
    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DomainError>;

    /// Sets a value only if the key is absent; returns whether it was written
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, DomainError>;

    /// Deletes the key only if it currently holds `expected`
    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, DomainError>;

    /// Resets the key's TTL only if it currently holds `expected`
    async fn extend_if_matches(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, DomainError>;

    /// Deletes a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, DomainError>;

    /// Remaining TTL of a key, `None` if it is missing or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, DomainError>;
}

/// Extension trait providing typed get/set operations
pub trait CacheExt: CacheStore {
    /// Gets a typed value
    fn get<'a, V>(
        &'a self,
        key: &'a str,
    ) -> impl std::future::Future<Output = Result<Option<V>, DomainError>> + Send
    where
        V: DeserializeOwned + Send,
    {
        async move {
            match self.get_raw(key).await? {
                Some(data) => {
                    let value: V = serde_json::from_str(&data).map_err(|e| {
                        DomainError::cache(format!("Failed to deserialize cache value: {}", e))
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    /// Sets a typed value with a TTL
    fn set<'a, V>(
        &'a self,
        key: &'a str,
        value: &'a V,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), DomainError>> + Send
    where
        V: Serialize + Send + Sync + ?Sized,
    {
        async move {
            let data = serde_json::to_string(value).map_err(|e| {
                DomainError::cache(format!("Failed to serialize cache value: {}", e))
            })?;
            self.set_raw(key, &data, ttl).await
        }
    }
}

// Blanket implementation for all types implementing CacheStore
impl<T: CacheStore + ?Sized> CacheExt for T {}
