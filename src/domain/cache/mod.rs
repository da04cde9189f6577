//! Cache domain - key derivation, store abstraction and call options

mod error;
mod key;
mod options;
mod store;

pub use error::LoadError;
pub use key::{
    CacheKeyGenerator, CacheKeyParams, DefaultKeyGenerator, KeyExclusions, LOCK_KEY_PREFIX,
};
pub use options::{is_empty_value, CacheOptions, DEFAULT_EXPIRE, DEFAULT_LOCK_TIMEOUT, MAX_TTL};
pub use store::{CacheExt, CacheStore};

#[cfg(test)]
pub use store::mock::TestCacheStore;
#[cfg(test)]
pub use store::MockCacheStore;
