use axum::{Extension, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::middleware::AuthUser;
use crate::models::{Purchase, PurchaseStatus};
use crate::services::IntentCreated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub video_id: String,
}

pub async fn create_intent(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateIntentRequest>,
) -> Result<Json<IntentCreated>> {
    let video_id = input.video_id.trim();
    if video_id.is_empty() {
        return Err(AppError::Validation("videoId is required".into()));
    }

    let created = state.purchases.create_intent(&user.user_id, video_id).await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    pub purchase_id: String,
}

/// Status as shown to a buyer polling after checkout. A pending purchase
/// reads as `processing`: the webhook may simply not have arrived yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Processing,
    Completed,
    Failed,
}

impl From<PurchaseStatus> for PaymentState {
    fn from(status: PurchaseStatus) -> Self {
        match status {
            PurchaseStatus::Pending => Self::Processing,
            PurchaseStatus::Completed => Self::Completed,
            PurchaseStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseView {
    pub purchase_id: String,
    pub video_id: String,
    pub status: PaymentState,
    pub amount: f64,
    pub currency: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl From<Purchase> for PurchaseView {
    fn from(p: Purchase) -> Self {
        Self {
            amount: p.amount(),
            status: p.status.into(),
            purchase_id: p.id,
            video_id: p.video_id,
            currency: p.currency,
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

pub async fn verify_purchase(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<PurchaseView>> {
    // Someone else's purchase is indistinguishable from a missing one
    let purchase = state
        .ledger
        .find_by_id(&query.purchase_id)?
        .filter(|p| p.user_id == user.user_id)
        .ok_or_else(|| AppError::NotFound("Purchase not found".into()))?;

    Ok(Json(purchase.into()))
}

#[derive(Debug, Serialize)]
pub struct PurchaseList {
    pub purchases: Vec<PurchaseView>,
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PurchaseList>> {
    let purchases = state
        .ledger
        .list_for_user(&user.user_id)?
        .into_iter()
        .map(PurchaseView::from)
        .collect();

    Ok(Json(PurchaseList { purchases }))
}
