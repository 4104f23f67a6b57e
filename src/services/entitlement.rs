use serde::Serialize;

use crate::cache::EntitlementCache;
use crate::db::PurchaseLedger;
use crate::error::{AppError, Result};

/// Answer to "can this user access this video".
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub has_access: bool,
    pub is_owner: bool,
    #[serde(skip)]
    user_id: String,
    #[serde(skip)]
    video_id: String,
}

impl AccessDecision {
    /// Proof of entitlement, if access was granted.
    pub fn grant(&self) -> Option<EntitlementGrant> {
        self.has_access.then(|| EntitlementGrant {
            user_id: self.user_id.clone(),
            video_id: self.video_id.clone(),
        })
    }

    pub fn require_grant(&self) -> Result<EntitlementGrant> {
        self.grant()
            .ok_or_else(|| AppError::VideoAccess("Video has not been purchased".into()))
    }
}

/// Proof that [`EntitlementService::check_access`] granted access.
///
/// Only obtainable from a positive [`AccessDecision`]; token issuance takes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementGrant {
    user_id: String,
    video_id: String,
}

impl EntitlementGrant {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }
}

/// The one place access decisions are made.
#[derive(Clone)]
pub struct EntitlementService {
    ledger: PurchaseLedger,
    cache: EntitlementCache,
}

impl EntitlementService {
    pub fn new(ledger: PurchaseLedger, cache: EntitlementCache) -> Self {
        Self { ledger, cache }
    }

    /// Owners always have access; anyone else needs a completed purchase.
    /// A pending purchase is simply "no access yet".
    pub async fn check_access(&self, user_id: &str, video_id: &str) -> Result<AccessDecision> {
        let video = self
            .ledger
            .video(video_id)?
            .ok_or_else(|| AppError::NotFound("Video not found".into()))?;

        let decision = |has_access, is_owner| AccessDecision {
            has_access,
            is_owner,
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
        };

        if video.is_owned_by(user_id) {
            return Ok(decision(true, true));
        }

        let purchased = self
            .cache
            .get_or_load(user_id, video_id, || {
                Ok(self.ledger.find_completed(user_id, video_id)?.is_some())
            })
            .await?;

        Ok(decision(purchased, false))
    }
}
