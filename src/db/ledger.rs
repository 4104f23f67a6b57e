use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::models::{CreatePurchase, CreateVideo, Purchase, PurchaseStatus, TransitionOutcome, Video};

use super::queries::{self, PendingInsertResult};
use super::DbPool;

/// Durable record of purchases and their transitions.
///
/// Every method checks a connection out of the pool and returns it before
/// yielding, so no connection or SQLite lock is ever held across an await.
#[derive(Clone)]
pub struct PurchaseLedger {
    pool: DbPool,
}

impl PurchaseLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a video's catalogue facts (owner, price) as supplied by the video service.
    pub fn register_video(&self, input: &CreateVideo) -> Result<Video> {
        let conn = self.pool.get()?;
        queries::create_video(&conn, input)
    }

    pub fn video(&self, video_id: &str) -> Result<Option<Video>> {
        let conn = self.pool.get()?;
        queries::get_video_by_id(&conn, video_id)
    }

    pub fn find_by_id(&self, purchase_id: &str) -> Result<Option<Purchase>> {
        let conn = self.pool.get()?;
        queries::get_purchase_by_id(&conn, purchase_id)
    }

    pub fn find_by_gateway_payment_id(&self, gateway_payment_id: &str) -> Result<Option<Purchase>> {
        let conn = self.pool.get()?;
        queries::get_purchase_by_gateway_payment_id(&conn, gateway_payment_id)
    }

    pub fn find_completed(&self, user_id: &str, video_id: &str) -> Result<Option<Purchase>> {
        let conn = self.pool.get()?;
        queries::get_completed_purchase(&conn, user_id, video_id)
    }

    /// Pending purchase younger than `window`, if any.
    pub fn find_active_pending(
        &self,
        user_id: &str,
        video_id: &str,
        window: Duration,
    ) -> Result<Option<Purchase>> {
        let conn = self.pool.get()?;
        queries::get_active_pending_purchase(&conn, user_id, video_id, pending_cutoff(window))
    }

    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Purchase>> {
        let conn = self.pool.get()?;
        queries::list_purchases_for_user(&conn, user_id)
    }

    pub fn insert_pending(&self, input: &CreatePurchase, window: Duration) -> Result<PendingInsertResult> {
        let mut conn = self.pool.get()?;
        queries::insert_pending_purchase(&mut conn, input, pending_cutoff(window))
    }

    pub fn set_gateway_payment_id(&self, purchase_id: &str, gateway_payment_id: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        queries::set_purchase_gateway_payment_id(&conn, purchase_id, gateway_payment_id)
    }

    /// The only write path for purchase status.
    pub fn transition(
        &self,
        purchase_id: &str,
        next: PurchaseStatus,
        gateway_payment_id: Option<&str>,
    ) -> Result<Option<TransitionOutcome>> {
        let mut conn = self.pool.get()?;
        queries::transition_purchase(&mut conn, purchase_id, next, gateway_payment_id)
    }
}

fn pending_cutoff(window: Duration) -> i64 {
    Utc::now().timestamp() - window.as_secs() as i64
}
