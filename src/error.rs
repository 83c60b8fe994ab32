//! Error types for the lending engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::{BookId, RecordId};

/// Postgres SQLSTATE codes that mean "try the transaction again"
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

/// Error kinds exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub enum ErrorKind {
    InvalidReference,
    OutOfStock,
    RecordNotFound,
    AlreadyReturned,
    Busy,
    Validation,
    Internal,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("No available copies of book {0}")]
    OutOfStock(BookId),

    #[error("Borrow record {0} not found")]
    RecordNotFound(RecordId),

    #[error("Borrow record {0} was already returned")]
    AlreadyReturned(RecordId),

    #[error("Storage is busy, gave up after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("Inventory corruption: {0}")]
    InventoryCorruption(String),

    /// Lock contention or serialization failure inside one attempt.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same transaction may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidReference(_) => ErrorKind::InvalidReference,
            AppError::OutOfStock(_) => ErrorKind::OutOfStock,
            AppError::RecordNotFound(_) => ErrorKind::RecordNotFound,
            AppError::AlreadyReturned(_) => ErrorKind::AlreadyReturned,
            AppError::Busy { .. } | AppError::Conflict(_) => ErrorKind::Busy,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::InventoryCorruption(_) | AppError::Database(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        // Every pooled connection busy is contention too
        let transient = matches!(e, sqlx::Error::PoolTimedOut)
            || e.as_database_error()
                .and_then(|db| db.code())
                .map(|code| TRANSIENT_SQLSTATES.contains(&&*code))
                .unwrap_or(false);

        if transient {
            AppError::Conflict(e.to_string())
        } else {
            AppError::Database(e)
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error_kind: ErrorKind,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidReference(_) | AppError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            AppError::OutOfStock(_) | AppError::AlreadyReturned(_) => StatusCode::CONFLICT,
            AppError::Busy { .. } | AppError::Conflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InventoryCorruption(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Corruption is already logged by the engine where it was detected
            if !matches!(self, AppError::InventoryCorruption(_)) {
                tracing::error!(error = ?self, "Internal error");
            }
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error_kind: self.kind(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
