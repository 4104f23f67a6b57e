use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub resets_in: Duration,
}

/// Fixed-window rate limiter keyed by an arbitrary scope string.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    prefix: &'static str,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// `limit == 0` disables the limiter.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            store,
            prefix,
            limit,
            window,
        }
    }

    pub async fn check(&self, scope: &str) -> Result<RateLimitDecision> {
        if self.limit == 0 {
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: u32::MAX,
                resets_in: Duration::ZERO,
            });
        }

        let key = format!("ratelimit:{}:{}", self.prefix, scope);
        let hits = self.store.increment(&key, self.window).await?;
        let limit = u64::from(self.limit);

        Ok(RateLimitDecision {
            allowed: hits.count <= limit,
            remaining: limit.saturating_sub(hits.count) as u32,
            resets_in: hits.resets_in,
        })
    }

    /// Like [`check`](Self::check) but turns a rejection into `AppError::RateLimited`.
    pub async fn enforce(&self, scope: &str) -> Result<()> {
        let decision = self.check(scope).await?;
        if decision.allowed {
            Ok(())
        } else {
            tracing::warn!("Rate limit hit for {}:{}", self.prefix, scope);
            Err(AppError::RateLimited {
                retry_after_secs: decision.resets_in.as_secs().max(1),
            })
        }
    }
}
