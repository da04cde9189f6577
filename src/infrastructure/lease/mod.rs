//! Distributed leases guarding cache loads

mod manager;

pub use manager::{Lease, LeaseManager, LeaseStatus, DEFAULT_RENEW_DIVISOR};
