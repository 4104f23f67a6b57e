use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::util::format_minor_units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
}

impl PurchaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the ledger may move a purchase from `self` to `next`.
    /// Only `pending -> completed` and `pending -> failed` exist.
    pub fn can_transition_to(&self, next: PurchaseStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub video_id: String,
    /// Minor currency units (cents); immutable once set
    pub amount_cents: i64,
    pub currency: String,
    pub status: PurchaseStatus,
    /// Set once the gateway-side payment exists; never changes afterwards
    pub gateway_payment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Unix seconds; present iff status == completed
    pub completed_at: Option<i64>,
}

impl Purchase {
    /// Decimal amount as shown to buyers, e.g. 999 cents -> 9.99
    pub fn amount(&self) -> f64 {
        self.amount_cents as f64 / 100.0
    }

    pub fn amount_display(&self) -> String {
        format_minor_units(self.amount_cents)
    }
}

#[derive(Debug, Clone)]
pub struct CreatePurchase {
    pub user_id: String,
    pub video_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

/// Outcome of a row-locked status transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The row moved to the requested status.
    Applied(Purchase),
    /// The row was already in a state the transition must not touch.
    Unchanged(Purchase),
}

impl TransitionOutcome {
    pub fn purchase(&self) -> &Purchase {
        match self {
            Self::Applied(p) | Self::Unchanged(p) => p,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_can_move() {
        use PurchaseStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn status_round_trips_through_strum() {
        assert_eq!(PurchaseStatus::Completed.as_ref(), "completed");
        assert_eq!(
            "failed".parse::<PurchaseStatus>().unwrap(),
            PurchaseStatus::Failed
        );
    }

    #[test]
    fn amount_is_exposed_as_decimal() {
        let purchase = Purchase {
            id: "p1".into(),
            user_id: "u1".into(),
            video_id: "v1".into(),
            amount_cents: 999,
            currency: "usd".into(),
            status: PurchaseStatus::Pending,
            gateway_payment_id: None,
            created_at: 1_000,
            updated_at: 1_000,
            completed_at: None,
        };
        assert_eq!(purchase.amount(), 9.99);
        assert_eq!(purchase.amount_display(), "9.99");
    }
}
