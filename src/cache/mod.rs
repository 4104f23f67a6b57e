//! Advisory caches over the shared store. The ledger stays authoritative:
//! a cache miss or a cache error always falls back to the ledger.

mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimiter};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::KeyValueStore;

/// Read-through cache of "user U has a completed purchase of video V".
///
/// Only positive answers are cached. A completed purchase never reverts, so a
/// cached `true` cannot go stale, while a negative answer is always re-read from
/// the ledger and can never hide a purchase that just completed.
#[derive(Clone)]
pub struct EntitlementCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl EntitlementCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(user_id: &str, video_id: &str) -> String {
        format!("entitlement:{}:{}", user_id, video_id)
    }

    pub async fn get_or_load<F>(&self, user_id: &str, video_id: &str, load: F) -> Result<bool>
    where
        F: FnOnce() -> Result<bool>,
    {
        let key = Self::key(user_id, video_id);

        match self.store.get(&key).await {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(e) => tracing::warn!("Entitlement cache read failed for {}: {}", key, e),
        }

        let purchased = load()?;
        if purchased {
            if let Err(e) = self.store.set(&key, "1", self.ttl).await {
                tracing::warn!("Entitlement cache write failed for {}: {}", key, e);
            }
        }
        Ok(purchased)
    }

    /// Drop any cached answer for the pair. Called synchronously with every
    /// transition to `completed`.
    pub async fn invalidate(&self, user_id: &str, video_id: &str) -> Result<()> {
        self.store.delete(&Self::key(user_id, video_id)).await?;
        Ok(())
    }
}

/// What a gateway payment id resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMapping {
    pub purchase_id: String,
    pub video_id: String,
    pub user_id: String,
}

impl IntentMapping {
    fn from_hash(mut hash: HashMap<String, String>) -> Option<Self> {
        Some(Self {
            purchase_id: hash.remove("purchase_id")?,
            video_id: hash.remove("video_id")?,
            user_id: hash.remove("user_id")?,
        })
    }
}

/// Short-lived `gateway_payment_id -> purchase` mapping written at intent creation.
#[derive(Clone)]
pub struct IntentCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl IntentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(gateway_payment_id: &str) -> String {
        format!("intent:{}", gateway_payment_id)
    }

    pub async fn remember(&self, gateway_payment_id: &str, mapping: &IntentMapping) -> Result<()> {
        self.store
            .hash_set(
                &Self::key(gateway_payment_id),
                &[
                    ("purchase_id", mapping.purchase_id.as_str()),
                    ("video_id", mapping.video_id.as_str()),
                    ("user_id", mapping.user_id.as_str()),
                ],
                self.ttl,
            )
            .await
    }

    pub async fn resolve(&self, gateway_payment_id: &str) -> Result<Option<IntentMapping>> {
        let hash = self.store.hash_get_all(&Self::key(gateway_payment_id)).await?;
        Ok(hash.and_then(IntentMapping::from_hash))
    }
}
