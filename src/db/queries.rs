use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{PURCHASE_COLS, VIDEO_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Videos ============

pub fn create_video(conn: &Connection, input: &CreateVideo) -> Result<Video> {
    let id = gen_id();
    let now = now();
    let currency = input.currency.as_ref().map(|c| c.to_lowercase());

    conn.execute(
        "INSERT INTO videos (id, owner_id, title, price_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &input.owner_id, &input.title, input.price_cents, &currency, now],
    )?;

    Ok(Video {
        id,
        owner_id: input.owner_id.clone(),
        title: input.title.clone(),
        price_cents: input.price_cents,
        currency,
        created_at: now,
    })
}

pub fn get_video_by_id(conn: &Connection, id: &str) -> Result<Option<Video>> {
    query_one(
        conn,
        &format!("SELECT {} FROM videos WHERE id = ?1", VIDEO_COLS),
        params![id],
    )
}

// ============ Purchases ============

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        params![id],
    )
}

pub fn get_purchase_by_gateway_payment_id(
    conn: &Connection,
    gateway_payment_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE gateway_payment_id = ?1",
            PURCHASE_COLS
        ),
        params![gateway_payment_id],
    )
}

pub fn get_completed_purchase(
    conn: &Connection,
    user_id: &str,
    video_id: &str,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases
             WHERE user_id = ?1 AND video_id = ?2 AND status = 'completed'",
            PURCHASE_COLS
        ),
        params![user_id, video_id],
    )
}

/// Most recent pending purchase created at or after `cutoff`.
/// Older pending rows are abandoned and deliberately not returned.
pub fn get_active_pending_purchase(
    conn: &Connection,
    user_id: &str,
    video_id: &str,
    cutoff: i64,
) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM purchases
             WHERE user_id = ?1 AND video_id = ?2 AND status = 'pending' AND created_at > ?3
             ORDER BY created_at DESC LIMIT 1",
            PURCHASE_COLS
        ),
        params![user_id, video_id, cutoff],
    )
}

pub fn list_purchases_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Purchase>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE user_id = ?1 ORDER BY created_at DESC, id",
            PURCHASE_COLS
        ),
        params![user_id],
    )
}

/// Result of trying to insert a pending purchase.
#[derive(Debug)]
pub enum PendingInsertResult {
    Inserted(Purchase),
    AlreadyPurchased,
    InProgress(Purchase),
}

/// Insert a pending purchase, re-checking the pair inside the write transaction.
///
/// IMMEDIATE takes SQLite's write lock at BEGIN, so the completed/pending checks
/// and the insert are serialized against every other writer. This closes the
/// window between the service's pre-lock checks and the insert.
pub fn insert_pending_purchase(
    conn: &mut Connection,
    input: &CreatePurchase,
    pending_cutoff: i64,
) -> Result<PendingInsertResult> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if get_completed_purchase(&tx, &input.user_id, &input.video_id)?.is_some() {
        return Ok(PendingInsertResult::AlreadyPurchased);
    }

    if let Some(pending) =
        get_active_pending_purchase(&tx, &input.user_id, &input.video_id, pending_cutoff)?
    {
        return Ok(PendingInsertResult::InProgress(pending));
    }

    let id = gen_id();
    let now = now();

    tx.execute(
        "INSERT INTO purchases (id, user_id, video_id, amount_cents, currency, status,
                                gateway_payment_id, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', NULL, ?6, ?7, NULL)",
        params![
            &id,
            &input.user_id,
            &input.video_id,
            input.amount_cents,
            &input.currency,
            now,
            now
        ],
    )?;

    tx.commit()?;

    Ok(PendingInsertResult::Inserted(Purchase {
        id,
        user_id: input.user_id.clone(),
        video_id: input.video_id.clone(),
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        status: PurchaseStatus::Pending,
        gateway_payment_id: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }))
}

/// Record the gateway payment id. Only succeeds while the column is still NULL
/// (or already holds the same value), so the id can never change once set.
pub fn set_purchase_gateway_payment_id(
    conn: &Connection,
    id: &str,
    gateway_payment_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE purchases SET gateway_payment_id = ?1, updated_at = ?2
         WHERE id = ?3 AND (gateway_payment_id IS NULL OR gateway_payment_id = ?1)",
        params![gateway_payment_id, now(), id],
    )?;
    Ok(affected > 0)
}

/// Apply a status transition under a row-serializing transaction.
///
/// The row is read and written inside one `BEGIN IMMEDIATE` transaction (the
/// SQLite equivalent of `SELECT ... FOR UPDATE`). Returns `None` if the purchase
/// does not exist. Transitions the state machine forbids return `Unchanged`.
///
/// `gateway_payment_id`, when given, must match the stored id if one is set;
/// if none is set yet it is recorded as part of the same write.
pub fn transition_purchase(
    conn: &mut Connection,
    id: &str,
    next: PurchaseStatus,
    gateway_payment_id: Option<&str>,
) -> Result<Option<TransitionOutcome>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(current) = query_one::<Purchase, _>(
        &tx,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        params![id],
    )?
    else {
        return Ok(None);
    };

    if !current.status.can_transition_to(next) {
        return Ok(Some(TransitionOutcome::Unchanged(current)));
    }

    if let (Some(stored), Some(incoming)) = (current.gateway_payment_id.as_deref(), gateway_payment_id)
    {
        if stored != incoming {
            tracing::warn!(
                "Purchase {} is bound to payment {} but event carried {}; not transitioning",
                current.id,
                stored,
                incoming
            );
            return Ok(Some(TransitionOutcome::Unchanged(current)));
        }
    }

    if next == PurchaseStatus::Completed {
        let other_completed: Option<String> = tx
            .query_row(
                "SELECT id FROM purchases
                 WHERE user_id = ?1 AND video_id = ?2 AND status = 'completed' AND id != ?3",
                params![&current.user_id, &current.video_id, &current.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(other) = other_completed {
            tracing::error!(
                target: "paystream::alert",
                "Payment succeeded for purchase {} but purchase {} already completed the same video; refund required",
                current.id,
                other
            );
            return Ok(Some(TransitionOutcome::Unchanged(current)));
        }
    }

    let now = now();
    let completed_at = (next == PurchaseStatus::Completed).then_some(now);
    let payment_id = current
        .gateway_payment_id
        .clone()
        .or_else(|| gateway_payment_id.map(String::from));

    tx.execute(
        "UPDATE purchases
         SET status = ?1, updated_at = ?2, completed_at = ?3, gateway_payment_id = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![next.as_ref(), now, completed_at, &payment_id, &current.id],
    )?;

    tx.commit()?;

    Ok(Some(TransitionOutcome::Applied(Purchase {
        status: next,
        updated_at: now,
        completed_at,
        gateway_payment_id: payment_id,
        ..current
    })))
}
