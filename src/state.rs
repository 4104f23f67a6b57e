use std::sync::Arc;

use crate::cache::{EntitlementCache, IntentCache, RateLimiter};
use crate::config::Config;
use crate::db::{DbPool, PurchaseLedger};
use crate::jwt::{SessionVerifier, StreamSigner};
use crate::lock::LockManager;
use crate::payments::PaymentGateway;
use crate::services::{
    AccessTokenIssuer, EntitlementService, PurchaseIntentService, WebhookFulfillmentService,
};
use crate::store::KeyValueStore;

/// Dev-only helpers exposed under `/dev`.
#[derive(Clone)]
pub struct DevTools {
    pub webhook_secret: String,
}

/// Everything a handler can reach. Built once at startup; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub ledger: PurchaseLedger,
    pub purchases: Arc<PurchaseIntentService>,
    pub fulfillment: Arc<WebhookFulfillmentService>,
    pub entitlements: Arc<EntitlementService>,
    pub tokens: Arc<AccessTokenIssuer>,
    pub sessions: SessionVerifier,
    pub dev: Option<DevTools>,
}

impl AppState {
    /// Wire the services together over the given collaborators.
    pub fn build(
        config: &Config,
        pool: DbPool,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn PaymentGateway>,
        sessions: SessionVerifier,
        signer: StreamSigner,
    ) -> Self {
        let policy = config.policy.clone();
        let ledger = PurchaseLedger::new(pool);

        let locks = LockManager::new(
            store.clone(),
            policy.lock_retry_attempts,
            policy.lock_retry_delay,
        );
        let entitlement_cache = EntitlementCache::new(store.clone(), policy.entitlement_cache_ttl);
        let intents = IntentCache::new(store.clone(), policy.intent_mapping_ttl);
        let rate_limiter = RateLimiter::new(
            store.clone(),
            "intent",
            policy.intent_rate_limit,
            policy.intent_rate_window,
        );

        let purchases = PurchaseIntentService::new(
            ledger.clone(),
            gateway.clone(),
            locks.clone(),
            intents.clone(),
            rate_limiter,
            config.currency.clone(),
            policy.clone(),
        );
        let fulfillment = WebhookFulfillmentService::new(
            ledger.clone(),
            gateway,
            store.clone(),
            locks,
            entitlement_cache.clone(),
            intents,
            policy.clone(),
        );
        let entitlements = EntitlementService::new(ledger.clone(), entitlement_cache);
        let tokens = AccessTokenIssuer::new(
            store,
            signer,
            policy.stream_token_ttl,
            policy.download_token_ttl,
        );

        let dev = config.dev_mode.then(|| DevTools {
            webhook_secret: config.stripe_webhook_secret.clone().unwrap_or_default(),
        });

        Self {
            ledger,
            purchases: Arc::new(purchases),
            fulfillment: Arc::new(fulfillment),
            entitlements: Arc::new(entitlements),
            tokens: Arc::new(tokens),
            sessions,
            dev,
        }
    }
}
