//! Infrastructure layer - Store adapters, leases and services

pub mod cache;
pub mod lease;
pub mod logging;
pub mod observability;
pub mod services;
