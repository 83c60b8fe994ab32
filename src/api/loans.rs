//! Issue and return endpoints
//!
//! The acting staff member is an explicit field of each request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::{OpenLoan, RecordId, ReturnReceipt},
    AppState,
};

/// Issue request
#[derive(Deserialize, Validate, ToSchema)]
pub struct IssueRequest {
    #[validate(range(min = 1))]
    pub student_id: i64,
    #[validate(range(min = 1))]
    pub book_id: i64,
    /// Staff member lending the copy
    #[validate(range(min = 1))]
    pub issued_by: i64,
}

#[derive(Serialize, ToSchema)]
pub struct IssueResponse {
    pub record_id: RecordId,
    pub due_date: NaiveDate,
    pub message: String,
}

/// Return request
#[derive(Deserialize, Validate, ToSchema)]
pub struct ReturnRequest {
    /// Staff member receiving the copy
    #[validate(range(min = 1))]
    pub returned_by: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    pub record_id: RecordId,
    pub fine: Decimal,
    pub overdue_days: i64,
    pub return_date: NaiveDate,
}

impl From<ReturnReceipt> for ReturnResponse {
    fn from(receipt: ReturnReceipt) -> Self {
        Self {
            record_id: receipt.record_id,
            fine: receipt.fine,
            overdue_days: receipt.overdue_days,
            return_date: receipt.return_date,
        }
    }
}

/// Lend one copy of a book to a student
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    request_body = IssueRequest,
    responses(
        (status = 201, description = "Book issued", body = IssueResponse),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 404, description = "Unknown student or book", body = crate::error::ErrorResponse),
        (status = 409, description = "No copy available", body = crate::error::ErrorResponse),
        (status = 503, description = "Storage busy, retry later", body = crate::error::ErrorResponse)
    )
)]
pub async fn issue_book(
    State(state): State<AppState>,
    Json(request): Json<IssueRequest>,
) -> AppResult<(StatusCode, Json<IssueResponse>)> {
    request.validate()?;

    let receipt = state
        .services
        .lending
        .issue(request.student_id, request.book_id, request.issued_by, Utc::now())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueResponse {
            record_id: receipt.record_id,
            due_date: receipt.due_date,
            message: "Book issued successfully".to_string(),
        }),
    ))
}

/// Return a borrowed copy and compute its fine
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    params(
        ("id" = i64, Path, description = "Borrow record ID")
    ),
    request_body = ReturnRequest,
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 404, description = "Record not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Already returned", body = crate::error::ErrorResponse),
        (status = 503, description = "Storage busy, retry later", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
    Json(request): Json<ReturnRequest>,
) -> AppResult<Json<ReturnResponse>> {
    request.validate()?;

    let receipt = state
        .services
        .lending
        .return_book(record_id, request.returned_by, Utc::now())
        .await?;

    Ok(Json(receipt.into()))
}

/// List every open borrow record
#[utoipa::path(
    get,
    path = "/loans/open",
    tag = "loans",
    responses(
        (status = 200, description = "Open borrow records", body = Vec<OpenLoan>)
    )
)]
pub async fn list_open_loans(State(state): State<AppState>) -> AppResult<Json<Vec<OpenLoan>>> {
    let loans = state
        .services
        .lending
        .open_records(Utc::now().date_naive())
        .await?;
    Ok(Json(loans))
}
