use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Business-rule violations raised while creating a purchase.
///
/// Each variant has a stable code that clients can branch on. None of these
/// are retried automatically, but the buyer may retry manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("video not found")]
    VideoNotFound,
    #[error("video does not have a valid price")]
    InvalidPrice,
    #[error("cannot purchase own content")]
    CannotPurchaseOwnContent,
    #[error("already purchased")]
    AlreadyPurchased,
    /// Also returned when the purchase lock is held by another request.
    #[error("purchase already in progress")]
    PurchaseInProgress,
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::VideoNotFound => "VIDEO_NOT_FOUND",
            Self::InvalidPrice => "INVALID_PRICE",
            Self::CannotPurchaseOwnContent => "CANNOT_PURCHASE_OWN_CONTENT",
            Self::AlreadyPurchased => "ALREADY_PURCHASED",
            Self::PurchaseInProgress => "PURCHASE_IN_PROGRESS",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::VideoNotFound => StatusCode::NOT_FOUND,
            Self::InvalidPrice | Self::CannotPurchaseOwnContent => StatusCode::BAD_REQUEST,
            Self::AlreadyPurchased | Self::PurchaseInProgress => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error("{0}")]
    VideoAccess(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("payment gateway error: {0}")]
    Gateway(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Payment(e) => e.code(),
            Self::VideoAccess(_) => "VIDEO_ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Payment(e) => e.status(),
            Self::VideoAccess(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Don't leak storage or gateway internals to clients
        let message = match &self {
            Self::Storage(detail) | Self::Internal(detail) => {
                tracing::error!("{}: {}", self.code(), detail);
                "Internal server error".to_string()
            }
            Self::Gateway(detail) => {
                tracing::error!("{}: {}", self.code(), detail);
                "Payment provider unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::Storage(format!("connection pool: {}", e))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Storage(format!("key-value store: {}", e))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {}", e))
    }
}
