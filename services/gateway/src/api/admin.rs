//! Operator endpoints: policy reload and on-demand directory sync.
//!
//! # Security considerations
//! - These routes change gateway state; the policy must grant them to an
//!   operator role explicitly. Nothing here bypasses the pipeline.
use crate::api::error::ApiError;
use crate::api::types::PolicyReloadResponse;
use crate::app::AppState;
use crate::directory::CycleReport;
use axum::Json;
use axum::extract::{Path, State};

/// Recompile the policy from its source and swap it in atomically.
///
/// # Errors
/// - 400 if the new policy is rejected; the previous policy stays active.
/// - 500 if the policy source cannot be read.
pub(crate) async fn reload_policy(
    State(state): State<AppState>,
) -> Result<Json<PolicyReloadResponse>, ApiError> {
    let version = state.engine.reload_from(state.policy_source.as_ref()).await?;
    let snapshot = state.engine.snapshot();
    Ok(Json(PolicyReloadResponse {
        version,
        rules: snapshot.rule_count(),
        bindings: snapshot.binding_count(),
    }))
}

/// Run one sync cycle of a single source and return its report.
pub(crate) async fn sync_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Result<Json<CycleReport>, ApiError> {
    state
        .synchronizer
        .sync_source(&source_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("directory source not found"))
}

/// Run one cycle of every enabled source.
pub(crate) async fn sync_all(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(state.synchronizer.run_cycle().await)
}

/// Last report of every source that has completed at least one cycle.
pub(crate) async fn sync_status(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(state.synchronizer.last_reports())
}
