//! The purchase fulfillment and entitlement pipeline.
//!
//! Every service is an explicit object built once at startup (see
//! [`crate::state::AppState::build`]) and shared behind an `Arc`. Collaborators
//! are injected, so tests swap in an in-memory store and a fake gateway.

mod access_tokens;
mod entitlement;
mod fulfillment;
mod purchase_intent;

pub use access_tokens::{AccessTokenIssuer, DownloadAccess, IssuedToken, StreamAccess};
pub use entitlement::{AccessDecision, EntitlementGrant, EntitlementService};
pub use fulfillment::{FulfillmentOutcome, WebhookFulfillmentService, fulfillment_marker_key};
pub use purchase_intent::{IntentCreated, PurchaseIntentService};
