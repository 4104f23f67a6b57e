//! Distributed mutual exclusion on top of the shared key-value store.
//!
//! A lock is a key holding a random ownership token with a TTL. Acquisition is
//! an atomic set-if-absent; release is an atomic compare-and-delete, so a caller
//! whose lock already expired can never release a lock now held by someone else.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::store::KeyValueStore;
use crate::util::random_hex;

/// Key for the purchase-creation lock of a (user, video) pair.
pub fn purchase_lock_key(user_id: &str, video_id: &str) -> String {
    format!("purchase:{}:{}", user_id, video_id)
}

/// Key for the fulfillment lock of a gateway payment.
pub fn fulfillment_lock_key(gateway_payment_id: &str) -> String {
    format!("fulfillment:{}", gateway_payment_id)
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>, retry_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            store,
            retry_attempts,
            retry_delay,
        }
    }

    /// Try to take the lock, retrying a bounded number of times on contention.
    ///
    /// Returns `None` if the lock is still held after the last attempt. Never
    /// waits longer than `retry_attempts * retry_delay`.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let token = random_hex(16);

        for attempt in 0..=self.retry_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            if self.store.set_if_absent(key, &token, ttl).await? {
                tracing::debug!("Acquired lock {} (attempt {})", key, attempt + 1);
                return Ok(Some(LockGuard {
                    store: self.store.clone(),
                    key: key.to_string(),
                    token,
                    released: false,
                }));
            }
        }

        tracing::debug!("Lock {} is held elsewhere", key);
        Ok(None)
    }

    /// Release `key` if it is still held under `token`.
    pub async fn release(&self, key: &str, token: &str) -> Result<bool> {
        self.store.compare_and_delete(key, token).await
    }
}

/// A held lock. Release it explicitly with [`LockGuard::release`]; if the guard
/// is dropped without that (panic, cancelled future), release is spawned on the
/// current runtime and the TTL remains the backstop.
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns false if the lock had already expired or been taken over.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        let released = self.store.compare_and_delete(&self.key, &self.token).await?;
        if !released {
            tracing::warn!("Lock {} expired before release", self.key);
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.compare_and_delete(&key, &token).await {
                        tracing::error!("Failed to release dropped lock {}: {}", key, e);
                    }
                });
            }
            Err(_) => tracing::warn!("Lock {} dropped outside a runtime; left to expire", key),
        }
    }
}
