//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, loans};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lending Engine API",
        version = "1.0.0",
        description = "Book lending transactions: issue, return and overdue fines",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        // Loans
        loans::issue_book,
        loans::return_book,
        loans::list_open_loans,
        // Inventory
        books::audit_book,
    ),
    components(
        schemas(
            // Loans
            loans::IssueRequest,
            loans::IssueResponse,
            loans::ReturnRequest,
            loans::ReturnResponse,
            crate::models::OpenLoan,
            // Inventory
            crate::models::InventoryAudit,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
            crate::error::ErrorKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Issue and return"),
        (name = "inventory", description = "Copy counters")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
