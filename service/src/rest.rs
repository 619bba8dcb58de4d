//! REST API handlers and `OpenAPI` documentation.
//!
//! The security subsystem's outward-facing surface is deliberately small: a
//! health probe and the read-only assessment report. Tenant-scoped business
//! routes live with the rest of the platform and consume this crate's
//! services as collaborators.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::security::audit::{AssessmentReport, AuditCategory, CategoryReport, CategoryStatus};
use crate::security::SecurityAuditService;

/// Generic error body; security-sensitive failures never explain themselves.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// `OpenAPI` documentation for the REST API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ISOHub Security API",
        description = "Security assessment and health surface for the ISOHub platform"
    ),
    paths(health, security_assessment),
    components(schemas(
        AssessmentReport,
        CategoryReport,
        AuditCategory,
        CategoryStatus,
        ErrorResponse
    ))
)]
pub struct ApiDoc;

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Aggregated point-in-time security assessment.
///
/// Read-only; running it mutates nothing.
#[utoipa::path(
    get,
    path = "/api/security/assessment",
    responses((status = 200, description = "Aggregated assessment", body = AssessmentReport))
)]
pub async fn security_assessment(
    Extension(audit): Extension<SecurityAuditService>,
) -> Json<AssessmentReport> {
    Json(audit.run_assessment().await)
}

/// Assemble the REST router with its service extensions.
pub fn router(audit: SecurityAuditService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/security/assessment", get(security_assessment))
        .layer(Extension(audit))
}
