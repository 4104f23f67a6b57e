mod stripe;

pub use stripe::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Correlation data attached to every gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub purchase_id: String,
    pub video_id: String,
    pub user_id: String,
}

/// A gateway-side payment object created for a purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIntent {
    /// Gateway payment id, the idempotency key for webhook events
    pub id: String,
    /// Handed to the buyer's client to complete payment at the gateway
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    Succeeded,
    PaymentFailed,
    Processing,
    /// Any event type the core does not act on
    Other(String),
}

impl GatewayEventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::Succeeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.processing" => Self::Processing,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "payment_intent.succeeded",
            Self::PaymentFailed => "payment_intent.payment_failed",
            Self::Processing => "payment_intent.processing",
            Self::Other(s) => s,
        }
    }
}

/// Authenticated, provider-agnostic webhook event.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: GatewayEventKind,
    /// Gateway payment id the event refers to (None for unrelated object types)
    pub payment_id: Option<String>,
    /// `purchase_id` from the payment's metadata, if present
    pub purchase_id: Option<String>,
}

/// Why an inbound webhook was rejected before any processing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventVerificationError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("signature mismatch")]
    InvalidSignature,
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    /// Authentic but unparseable payload
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
}

impl EventVerificationError {
    /// Authenticity failures are rejected; an authentic-but-unreadable payload is not.
    pub fn is_authenticity_failure(&self) -> bool {
        !matches!(self, Self::MalformedPayload(_))
    }
}

/// The external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment for `amount_minor` units of `currency`.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &IntentMetadata,
    ) -> Result<GatewayIntent>;

    /// Check the signature over the raw body, then parse the event.
    fn verify_event(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> std::result::Result<GatewayEvent, EventVerificationError>;

    /// Header carrying the webhook signature.
    fn signature_header(&self) -> &'static str;
}
