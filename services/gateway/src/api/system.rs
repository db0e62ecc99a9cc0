//! System/health API handlers.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
//! - System info is derived from in-memory state.
use crate::api::error::ApiError;
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

/// Return gateway identity, policy generation, and pipeline layout.
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    let snapshot = state.engine.snapshot();
    Json(SystemInfo {
        service: "tollgate-gateway".to_string(),
        policy_version: snapshot.version(),
        policy_domains: snapshot.domains(),
        user_store: state.users.backend_name().to_string(),
        pipeline: state
            .pipeline
            .stage_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Return gateway health.
///
/// # Errors
/// - Returns 500 if the user store health check fails.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.users.health_check().await {
        return Err(ApiError::store(&err, "storage unavailable"));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
