use std::sync::Arc;

use serde::Serialize;

use crate::cache::{IntentCache, IntentMapping, RateLimiter};
use crate::config::Policy;
use crate::db::{PendingInsertResult, PurchaseLedger};
use crate::error::{AppError, PaymentError, Result};
use crate::lock::{LockManager, purchase_lock_key};
use crate::models::{CreatePurchase, Purchase, PurchaseStatus};
use crate::payments::{IntentMetadata, PaymentGateway};

/// Returned to the buyer's client after a successful `create_intent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentCreated {
    pub client_secret: String,
    /// Decimal amount, e.g. 9.99
    pub amount: f64,
    pub currency: String,
    pub purchase_id: String,
}

pub struct PurchaseIntentService {
    ledger: PurchaseLedger,
    gateway: Arc<dyn PaymentGateway>,
    locks: LockManager,
    intents: IntentCache,
    rate_limiter: RateLimiter,
    default_currency: String,
    policy: Policy,
}

impl PurchaseIntentService {
    pub fn new(
        ledger: PurchaseLedger,
        gateway: Arc<dyn PaymentGateway>,
        locks: LockManager,
        intents: IntentCache,
        rate_limiter: RateLimiter,
        default_currency: impl Into<String>,
        policy: Policy,
    ) -> Self {
        Self {
            ledger,
            gateway,
            locks,
            intents,
            rate_limiter,
            default_currency: default_currency.into(),
            policy,
        }
    }

    /// Start a purchase of `video_id` by `user_id`.
    ///
    /// Validation runs in a fixed order and each check is a hard failure:
    /// price, ownership, completed purchase, active pending purchase, then the
    /// purchase lock. The pending row is written before the gateway is called so
    /// a fast webhook can always be correlated.
    pub async fn create_intent(&self, user_id: &str, video_id: &str) -> Result<IntentCreated> {
        self.rate_limiter.enforce(user_id).await?;

        let video = self
            .ledger
            .video(video_id)?
            .ok_or(PaymentError::VideoNotFound)?;
        let amount_cents = video.valid_price().ok_or(PaymentError::InvalidPrice)?;

        if video.is_owned_by(user_id) {
            return Err(PaymentError::CannotPurchaseOwnContent.into());
        }

        if self.ledger.find_completed(user_id, video_id)?.is_some() {
            return Err(PaymentError::AlreadyPurchased.into());
        }

        if self
            .ledger
            .find_active_pending(user_id, video_id, self.policy.pending_purchase_window)?
            .is_some()
        {
            return Err(PaymentError::PurchaseInProgress.into());
        }

        let lock_key = purchase_lock_key(user_id, video_id);
        let Some(guard) = self
            .locks
            .acquire(&lock_key, self.policy.purchase_lock_ttl)
            .await?
        else {
            tracing::info!("Purchase lock {} held elsewhere; rejecting", lock_key);
            return Err(PaymentError::PurchaseInProgress.into());
        };

        let input = CreatePurchase {
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
            amount_cents,
            currency: video
                .currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone()),
        };
        let result = self.create_locked(&input).await;

        if let Err(e) = guard.release().await {
            tracing::error!("Failed to release purchase lock {}: {}", lock_key, e);
        }

        result
    }

    async fn create_locked(&self, input: &CreatePurchase) -> Result<IntentCreated> {
        let purchase = match self
            .ledger
            .insert_pending(input, self.policy.pending_purchase_window)?
        {
            PendingInsertResult::Inserted(purchase) => purchase,
            PendingInsertResult::AlreadyPurchased => {
                return Err(PaymentError::AlreadyPurchased.into());
            }
            PendingInsertResult::InProgress(_) => {
                return Err(PaymentError::PurchaseInProgress.into());
            }
        };

        let metadata = IntentMetadata {
            purchase_id: purchase.id.clone(),
            video_id: purchase.video_id.clone(),
            user_id: purchase.user_id.clone(),
        };

        let intent = match self
            .gateway
            .create_intent(purchase.amount_cents, &purchase.currency, &metadata)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                self.abandon(&purchase);
                return Err(e);
            }
        };

        match self.ledger.set_gateway_payment_id(&purchase.id, &intent.id) {
            Ok(true) => {}
            Ok(false) => {
                self.abandon(&purchase);
                return Err(AppError::Internal(format!(
                    "Purchase {} is already bound to another payment",
                    purchase.id
                )));
            }
            Err(e) => {
                self.abandon(&purchase);
                return Err(e);
            }
        }

        let mapping = IntentMapping {
            purchase_id: purchase.id.clone(),
            video_id: purchase.video_id.clone(),
            user_id: purchase.user_id.clone(),
        };
        if let Err(e) = self.intents.remember(&intent.id, &mapping).await {
            // The ledger lookup by payment id still resolves the purchase.
            tracing::warn!("Failed to cache intent mapping for {}: {}", intent.id, e);
        }

        tracing::info!(
            "Created purchase {} ({} {}) for user {} video {} with payment {}",
            purchase.id,
            purchase.amount_display(),
            purchase.currency,
            purchase.user_id,
            purchase.video_id,
            intent.id
        );

        Ok(IntentCreated {
            client_secret: intent.client_secret,
            amount: purchase.amount(),
            currency: purchase.currency.clone(),
            purchase_id: purchase.id,
        })
    }

    /// Mark a purchase whose gateway call failed so it stops blocking retries.
    fn abandon(&self, purchase: &Purchase) {
        match self.ledger.transition(&purchase.id, PurchaseStatus::Failed, None) {
            Ok(_) => tracing::warn!("Gateway call failed; purchase {} marked failed", purchase.id),
            Err(e) => tracing::error!(
                target: "paystream::alert",
                "Gateway call failed and purchase {} could not be marked failed: {}",
                purchase.id,
                e
            ),
        }
    }
}
