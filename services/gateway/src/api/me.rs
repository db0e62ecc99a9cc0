//! The signed-in subject's own view.
use crate::api::error::ApiError;
use crate::api::types::MeResponse;
use crate::app::AppState;
use crate::auth::subject::Subject;
use crate::directory::sync::DEFAULT_MAX_ATTEMPTS;
use crate::store::{StoreError, update_user};
use axum::extract::State;
use axum::{Extension, Json};
use std::collections::BTreeMap;

fn signed_in(subject: Option<Extension<Subject>>) -> Result<Subject, ApiError> {
    subject
        .map(|Extension(subject)| subject)
        .ok_or_else(ApiError::sign_in_required)
}

pub(crate) async fn get_me(
    State(state): State<AppState>,
    subject: Option<Extension<Subject>>,
) -> Result<Json<MeResponse>, ApiError> {
    let subject = signed_in(subject)?;
    let user = match &subject.user_id {
        Some(user_id) => state
            .users
            .get_user(user_id)
            .await
            .map_err(|err| ApiError::store(&err, "failed to load user"))?,
        None => None,
    };
    Ok(Json(MeResponse {
        id: subject.id,
        domain: subject.domain,
        roles: subject.roles,
        user,
    }))
}

/// Merge preferences into the local record. Directory-owned fields are
/// never written here, so this cannot race the synchronizer's changes.
pub(crate) async fn put_preferences(
    State(state): State<AppState>,
    subject: Option<Extension<Subject>>,
    Json(preferences): Json<BTreeMap<String, String>>,
) -> Result<Json<MeResponse>, ApiError> {
    let subject = signed_in(subject)?;
    let user_id = subject
        .user_id
        .clone()
        .ok_or_else(|| ApiError::not_found("no local user record"))?;
    let user = update_user(state.users.as_ref(), &user_id, DEFAULT_MAX_ATTEMPTS, |user| {
        user.local
            .preferences
            .extend(preferences.iter().map(|(k, v)| (k.clone(), v.clone())));
    })
    .await
    .map_err(|err| match err {
        StoreError::NotFound(_) => ApiError::not_found("no local user record"),
        other => ApiError::store(&other, "failed to update preferences"),
    })?;
    Ok(Json(MeResponse {
        id: subject.id,
        domain: subject.domain,
        roles: subject.roles,
        user: Some(user),
    }))
}
