//! Shared key-value store used for locks, caches and token mirrors.
//!
//! Every write carries a TTL. Implementations must make `set_if_absent`,
//! `compare_and_delete`, `take` and `increment` single atomic operations.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Fixed-window counter state returned by [`KeyValueStore::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Time until the window resets
    pub resets_in: Duration,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Atomically read and delete. At most one concurrent caller sees the value.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Write all fields of a hash and (re)set its TTL in one operation.
    async fn hash_set(&self, key: &str, fields: &[(&str, &str)], ttl: Duration) -> Result<()>;

    /// None if the hash does not exist (or has expired).
    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    /// Increment a counter; the first increment starts a window of `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount>;
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
