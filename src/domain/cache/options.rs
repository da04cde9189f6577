//! Per-call cache options

use std::time::Duration;

use serde_json::Value;

use super::KeyExclusions;

/// Default entry TTL
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(300);

/// Default lease TTL used while loading a missing value
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest TTL or wait the stores and coordinator will honour (one year)
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Options controlling how a single call reads, loads and writes the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// TTL of written entries
    pub expire: Duration,
    /// Skip writing null, `{}` and `[]` results
    pub ignore_null: bool,
    /// Arguments left out of key derivation
    pub exclusions: KeyExclusions,
    /// TTL of the loading lease; waiters give up after this plus a grace period
    pub lock_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            expire: DEFAULT_EXPIRE,
            ignore_null: true,
            exclusions: KeyExclusions::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry TTL
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    /// Sets whether empty results are skipped
    pub fn with_ignore_null(mut self, ignore_null: bool) -> Self {
        self.ignore_null = ignore_null;
        self
    }

    /// Caches empty results too
    pub fn cache_empty(self) -> Self {
        self.with_ignore_null(false)
    }

    /// Leaves the positional argument at `index` out of the key
    pub fn excluding_position(mut self, index: usize) -> Self {
        self.exclusions = self.exclusions.with_position(index);
        self
    }

    /// Leaves the named argument `name` out of the key
    pub fn excluding_name(mut self, name: impl Into<String>) -> Self {
        self.exclusions = self.exclusions.with_name(name);
        self
    }

    /// Sets the loading lease TTL
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Whether a serialized result should be written to the store
    pub fn should_cache(&self, value: &Value) -> bool {
        !(self.ignore_null && is_empty_value(value))
    }
}

/// Null, empty object or empty array
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();

        assert_eq!(options.expire, Duration::from_secs(300));
        assert!(options.ignore_null);
        assert!(options.exclusions.is_empty());
        assert_eq!(options.lock_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let options = CacheOptions::new()
            .with_expire(Duration::from_secs(60))
            .cache_empty()
            .excluding_name("database")
            .excluding_position(0)
            .with_lock_timeout(Duration::from_secs(2));

        assert_eq!(options.expire, Duration::from_secs(60));
        assert!(!options.ignore_null);
        assert!(options.exclusions.excludes_name("database"));
        assert!(options.exclusions.excludes_position(0));
        assert_eq!(options.lock_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!({})));
        assert!(is_empty_value(&json!([])));

        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("")));
        assert!(!is_empty_value(&json!([null])));
    }

    #[test]
    fn test_should_cache_respects_ignore_null() {
        let skip_empty = CacheOptions::default();
        let keep_empty = CacheOptions::default().cache_empty();

        assert!(!skip_empty.should_cache(&json!([])));
        assert!(skip_empty.should_cache(&json!(["fantasy"])));
        assert!(keep_empty.should_cache(&json!([])));
        assert!(keep_empty.should_cache(&Value::Null));
    }
}
