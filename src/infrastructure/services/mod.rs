//! Infrastructure services

mod cache_service;
mod cached_fn;
mod singleflight;

pub use cache_service::{CacheService, CacheServiceConfig};
pub use cached_fn::{CachedFn, KeyArgs};
pub use singleflight::{
    Singleflight, SingleflightConfig, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_GRACE,
};
