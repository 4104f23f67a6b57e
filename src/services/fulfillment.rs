use std::sync::Arc;

use serde::Serialize;

use crate::cache::{EntitlementCache, IntentCache};
use crate::config::Policy;
use crate::db::PurchaseLedger;
use crate::error::Result;
use crate::lock::{LockManager, fulfillment_lock_key};
use crate::models::{Purchase, PurchaseStatus, TransitionOutcome};
use crate::payments::{EventVerificationError, GatewayEvent, GatewayEventKind, PaymentGateway};
use crate::store::KeyValueStore;

/// Key of the marker recording that a gateway payment reached a terminal state.
pub fn fulfillment_marker_key(gateway_payment_id: &str) -> String {
    format!("fulfillment:done:{}", gateway_payment_id)
}

/// What happened to one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    /// `pending -> completed` was applied.
    Completed { purchase_id: String },
    /// `pending -> failed` was applied.
    Failed { purchase_id: String },
    /// The purchase was found but the event did not move it.
    NoChange {
        purchase_id: String,
        status: PurchaseStatus,
    },
    /// Another delivery for the same payment holds the fulfillment lock.
    AlreadyProcessing,
    /// The payment already reached a terminal state.
    AlreadyFulfilled,
    /// Event type the core does not act on.
    Ignored { event_type: String },
    /// No purchase could be correlated with the event.
    Unmatched,
    /// Processing failed; logged for alerting and acknowledged.
    Deferred,
}

impl FulfillmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::NoChange { .. } => "no_change",
            Self::AlreadyProcessing => "already_processing",
            Self::AlreadyFulfilled => "already_fulfilled",
            Self::Ignored { .. } => "ignored",
            Self::Unmatched => "unmatched",
            Self::Deferred => "deferred",
        }
    }
}

/// Consumes gateway events and drives purchase transitions exactly once.
///
/// Delivery is at-least-once and unordered. Concurrent duplicates are stopped by
/// the fulfillment lock; late duplicates (after the lock expired) are stopped by
/// the completion marker; everything else is stopped by the ledger's state
/// machine, which only ever moves a `pending` row.
pub struct WebhookFulfillmentService {
    ledger: PurchaseLedger,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn KeyValueStore>,
    locks: LockManager,
    entitlements: EntitlementCache,
    intents: IntentCache,
    policy: Policy,
}

impl WebhookFulfillmentService {
    pub fn new(
        ledger: PurchaseLedger,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn KeyValueStore>,
        locks: LockManager,
        entitlements: EntitlementCache,
        intents: IntentCache,
        policy: Policy,
    ) -> Self {
        Self {
            ledger,
            gateway,
            store,
            locks,
            entitlements,
            intents,
            policy,
        }
    }

    pub fn signature_header(&self) -> &'static str {
        self.gateway.signature_header()
    }

    /// Authenticate and process one raw webhook delivery.
    ///
    /// Only authenticity failures are returned as errors. Processing failures
    /// are logged to `paystream::alert` and reported as [`FulfillmentOutcome::Deferred`]
    /// so the gateway receives an acknowledgement.
    pub async fn receive(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> std::result::Result<FulfillmentOutcome, EventVerificationError> {
        let event = match self.gateway.verify_event(raw_body, signature) {
            Ok(event) => event,
            Err(e) if e.is_authenticity_failure() => {
                tracing::warn!("Rejected webhook: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!(target: "paystream::alert", "Authentic webhook could not be read: {}", e);
                return Ok(FulfillmentOutcome::Deferred);
            }
        };

        match self.process(&event).await {
            Ok(outcome) => {
                tracing::debug!("Webhook {} ({}): {}", event.id, event.kind.as_str(), outcome.as_str());
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(
                    target: "paystream::alert",
                    "Webhook {} ({}) for payment {:?} failed: {}",
                    event.id,
                    event.kind.as_str(),
                    event.payment_id,
                    e
                );
                Ok(FulfillmentOutcome::Deferred)
            }
        }
    }

    /// Apply an already-authenticated event.
    pub async fn process(&self, event: &GatewayEvent) -> Result<FulfillmentOutcome> {
        if let GatewayEventKind::Other(event_type) = &event.kind {
            tracing::info!("Ignoring webhook {} of type {}", event.id, event_type);
            return Ok(FulfillmentOutcome::Ignored {
                event_type: event_type.clone(),
            });
        }

        let Some(payment_id) = event.payment_id.as_deref() else {
            tracing::warn!("Webhook {} carries no payment id", event.id);
            return Ok(FulfillmentOutcome::Unmatched);
        };

        let lock_key = fulfillment_lock_key(payment_id);
        let Some(guard) = self
            .locks
            .acquire(&lock_key, self.policy.fulfillment_lock_ttl)
            .await?
        else {
            tracing::info!("Payment {} is already being fulfilled", payment_id);
            return Ok(FulfillmentOutcome::AlreadyProcessing);
        };

        let result = self.process_locked(event, payment_id).await;

        if let Err(e) = guard.release().await {
            tracing::error!("Failed to release fulfillment lock {}: {}", lock_key, e);
        }

        result
    }

    async fn process_locked(&self, event: &GatewayEvent, payment_id: &str) -> Result<FulfillmentOutcome> {
        let marker_key = fulfillment_marker_key(payment_id);
        if self.store.get(&marker_key).await?.is_some() {
            tracing::info!("Payment {} already fulfilled; skipping {}", payment_id, event.id);
            return Ok(FulfillmentOutcome::AlreadyFulfilled);
        }

        let Some(purchase_id) = self.resolve_purchase_id(event, payment_id).await? else {
            tracing::warn!(
                "Webhook {} for payment {} matches no purchase; acknowledging",
                event.id,
                payment_id
            );
            return Ok(FulfillmentOutcome::Unmatched);
        };

        let next = match event.kind {
            GatewayEventKind::Succeeded => PurchaseStatus::Completed,
            GatewayEventKind::PaymentFailed => PurchaseStatus::Failed,
            GatewayEventKind::Processing | GatewayEventKind::Other(_) => {
                // Never moves the row; only confirms it exists.
                return Ok(match self.ledger.find_by_id(&purchase_id)? {
                    Some(purchase) => FulfillmentOutcome::NoChange {
                        purchase_id: purchase.id,
                        status: purchase.status,
                    },
                    None => FulfillmentOutcome::Unmatched,
                });
            }
        };

        let outcome = match self.ledger.transition(&purchase_id, next, Some(payment_id))? {
            Some(outcome) => outcome,
            None => {
                tracing::warn!("Webhook {} names unknown purchase {}", event.id, purchase_id);
                return Ok(FulfillmentOutcome::Unmatched);
            }
        };

        match outcome {
            TransitionOutcome::Applied(purchase) => {
                if purchase.status == PurchaseStatus::Completed {
                    if let Err(e) = self
                        .entitlements
                        .invalidate(&purchase.user_id, &purchase.video_id)
                        .await
                    {
                        tracing::error!(
                            target: "paystream::alert",
                            "Purchase {} completed but entitlement cache invalidation failed: {}",
                            purchase.id,
                            e
                        );
                    }
                }
                self.write_marker(&marker_key, &purchase).await;

                tracing::info!(
                    "Purchase {} {} via payment {}",
                    purchase.id,
                    purchase.status.as_ref(),
                    payment_id
                );

                Ok(match purchase.status {
                    PurchaseStatus::Completed => FulfillmentOutcome::Completed {
                        purchase_id: purchase.id,
                    },
                    _ => FulfillmentOutcome::Failed {
                        purchase_id: purchase.id,
                    },
                })
            }
            TransitionOutcome::Unchanged(purchase) => {
                if purchase.status.is_terminal()
                    && purchase.gateway_payment_id.as_deref() == Some(payment_id)
                {
                    self.write_marker(&marker_key, &purchase).await;
                }
                tracing::info!(
                    "Webhook {} left purchase {} {}",
                    event.id,
                    purchase.id,
                    purchase.status.as_ref()
                );
                Ok(FulfillmentOutcome::NoChange {
                    purchase_id: purchase.id,
                    status: purchase.status,
                })
            }
        }
    }

    /// Metadata first, then the intent mapping, then the ledger.
    async fn resolve_purchase_id(&self, event: &GatewayEvent, payment_id: &str) -> Result<Option<String>> {
        if let Some(id) = &event.purchase_id {
            return Ok(Some(id.clone()));
        }

        match self.intents.resolve(payment_id).await {
            Ok(Some(mapping)) => return Ok(Some(mapping.purchase_id)),
            Ok(None) => {}
            Err(e) => tracing::warn!("Intent mapping lookup for {} failed: {}", payment_id, e),
        }

        Ok(self
            .ledger
            .find_by_gateway_payment_id(payment_id)?
            .map(|p| p.id))
    }

    /// The ledger is already final here; a lost marker only costs a re-check.
    async fn write_marker(&self, key: &str, purchase: &Purchase) {
        if let Err(e) = self
            .store
            .set(key, &purchase.id, self.policy.fulfillment_marker_ttl)
            .await
        {
            tracing::warn!("Failed to write fulfillment marker {}: {}", key, e);
        }
    }
}
