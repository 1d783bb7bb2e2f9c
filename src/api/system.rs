//! Liveness and health handlers.
//!
//! # Purpose
//! Lightweight endpoints for health checks and operators.
//!
//! # Key invariants
//! - Health checks must be fast and side-effect free.
use crate::api::error::{ApiError, Envelope, api_internal, ok};
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/",
    tag = "system",
    responses(
        (status = 200, description = "Liveness string", body = String)
    )
)]
pub(crate) async fn liveness() -> &'static str {
    "Welcome to orchestrator auth"
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Store health", body = HealthStatus),
        (status = 500, description = "Store unavailable", body = crate::api::types::ErrorBody)
    )
)]
/// Return service health.
///
/// # What it does
/// Pings the backing store and reports `ok` with the backend name.
///
/// # Errors
/// - Returns 500 if the store health check fails.
pub(crate) async fn health(
    State(state): State<AppState>,
) -> Result<Json<Envelope<HealthStatus>>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(ok(HealthStatus {
        status: "ok".to_string(),
        backend: state.store.backend_name().to_string(),
    }))
}
