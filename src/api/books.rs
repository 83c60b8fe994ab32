//! Inventory endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::InventoryAudit, AppState};

/// Cross-check a book's copy counters against its open borrow records
#[utoipa::path(
    get,
    path = "/books/{id}/audit",
    tag = "inventory",
    params(
        ("id" = i64, Path, description = "Book ID")
    ),
    responses(
        (status = 200, description = "Counters are consistent", body = InventoryAudit),
        (status = 404, description = "Book not found", body = crate::error::ErrorResponse),
        (status = 500, description = "Counters are corrupted", body = crate::error::ErrorResponse)
    )
)]
pub async fn audit_book(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
) -> AppResult<Json<InventoryAudit>> {
    let audit = state.services.lending.audit_book(book_id).await?;
    Ok(Json(audit))
}
