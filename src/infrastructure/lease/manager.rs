//! Lease acquisition, renewal and release

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::domain::cache::{CacheStore, MAX_TTL};
use crate::domain::DomainError;
use crate::infrastructure::observability::metrics;

/// Default number of renewals per lease TTL
pub const DEFAULT_RENEW_DIVISOR: u32 = 3;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(1);

/// Observed state of a held lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    /// The last renewal (or the acquisition) confirmed this holder's token
    Held,
    /// A renewal found another token or no key: the lease expired
    Lost,
}

/// Acquires leases on lock keys in a shared store
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn CacheStore>,
    renew_divisor: u32,
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("store", &self.store)
            .field("renew_divisor", &self.renew_divisor)
            .finish()
    }
}

impl LeaseManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            renew_divisor: DEFAULT_RENEW_DIVISOR,
        }
    }

    /// Renew `divisor` times per TTL; values below 2 are raised to 2
    pub fn with_renew_divisor(mut self, divisor: u32) -> Self {
        self.renew_divisor = divisor.max(2);
        self
    }

    pub fn renew_interval(&self, ttl: Duration) -> Duration {
        (ttl.min(MAX_TTL) / self.renew_divisor).max(MIN_RENEW_INTERVAL)
    }

    /// Tries to take the lease on `lock_key`
    ///
    /// Returns `Ok(None)` when another holder has it. A store failure is an
    /// `Err`: the caller cannot tell whether anyone holds the lease.
    pub async fn acquire(&self, lock_key: &str, ttl: Duration) -> Result<Option<Lease>, DomainError> {
        let token = Uuid::new_v4().to_string();
        let ttl = ttl.min(MAX_TTL);

        if !self.store.set_if_absent(lock_key, &token, ttl).await? {
            tracing::debug!(lock_key = %lock_key, "Lease held elsewhere");
            metrics::record_lease_contended();
            return Ok(None);
        }

        tracing::debug!(lock_key = %lock_key, token = %token, ttl_ms = ttl.as_millis() as u64, "Lease acquired");
        metrics::record_lease_acquired();

        let lost = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(
            self.store.clone(),
            lock_key.to_string(),
            token.clone(),
            ttl,
            self.renew_interval(ttl),
            lost.clone(),
        );

        Ok(Some(Lease {
            lock_key: lock_key.to_string(),
            token,
            ttl,
            store: self.store.clone(),
            lost,
            heartbeat: Some(heartbeat),
            released: false,
        }))
    }
}

/// An exclusively owned lease on a lock key
///
/// While the value is alive a background task keeps extending the key's TTL.
/// Call [`Lease::release`] when done; dropping an unreleased lease (for
/// example when the owning future is cancelled) stops the renewal and
/// releases the key from a spawned task.
pub struct Lease {
    lock_key: String,
    token: String,
    ttl: Duration,
    store: Arc<dyn CacheStore>,
    lost: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("lock_key", &self.lock_key)
            .field("token", &self.token)
            .field("ttl", &self.ttl)
            .field("status", &self.status())
            .finish()
    }
}

impl Lease {
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// The holder token written to the lock key
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn status(&self) -> LeaseStatus {
        if self.lost.load(Ordering::SeqCst) {
            LeaseStatus::Lost
        } else {
            LeaseStatus::Held
        }
    }

    /// Stops renewal and deletes the lock key if it still holds this token
    ///
    /// Returns whether the key was deleted. Failures are logged, never raised.
    pub async fn release(mut self) -> bool {
        self.stop_heartbeat();

        // Marked only once the delete has run, so a cancelled release still
        // falls through to the drop path
        let deleted = release_lock(self.store.as_ref(), &self.lock_key, &self.token).await;
        self.released = true;

        deleted
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.stop_heartbeat();

        if self.released {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                lock_key = %self.lock_key,
                "Lease dropped outside a runtime, leaving it to expire"
            );
            return;
        };

        tracing::debug!(lock_key = %self.lock_key, "Lease dropped before release, releasing in background");

        let store = self.store.clone();
        let lock_key = std::mem::take(&mut self.lock_key);
        let token = std::mem::take(&mut self.token);

        runtime.spawn(async move {
            release_lock(store.as_ref(), &lock_key, &token).await;
        });
    }
}

async fn release_lock(store: &dyn CacheStore, lock_key: &str, token: &str) -> bool {
    match store.delete_if_matches(lock_key, token).await {
        Ok(true) => {
            tracing::debug!(lock_key = %lock_key, "Lease released");
            true
        }
        Ok(false) => {
            tracing::warn!(
                lock_key = %lock_key,
                "Lease expired before release; leaving the current holder alone"
            );
            false
        }
        Err(e) => {
            tracing::warn!(lock_key = %lock_key, error = %e, "Failed to release lease");
            metrics::record_store_error("delete_if_matches");
            metrics::record_lease_release_failed();
            false
        }
    }
}

fn spawn_heartbeat(
    store: Arc<dyn CacheStore>,
    lock_key: String,
    token: String,
    ttl: Duration,
    interval: Duration,
    lost: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match store.extend_if_matches(&lock_key, &token, ttl).await {
                Ok(true) => {
                    tracing::trace!(lock_key = %lock_key, "Lease renewed");
                }
                Ok(false) => {
                    lost.store(true, Ordering::SeqCst);
                    tracing::warn!(
                        lock_key = %lock_key,
                        "Lease lost before the protected work finished"
                    );
                    metrics::record_lease_lost();
                    break;
                }
                Err(e) => {
                    // The TTL still bounds the lock; keep trying until it runs out
                    tracing::warn!(lock_key = %lock_key, error = %e, "Lease renewal failed");
                    metrics::record_store_error("extend_if_matches");
                }
            }
        }
    })
}
