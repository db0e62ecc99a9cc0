//! Axum middleware that runs the pipeline in front of the route table.
use super::{Pipeline, RequestContext, StageOutcome, Termination};
use crate::api::error::ApiError;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeDir;

#[derive(Clone)]
pub struct PipelineState {
    pub pipeline: Arc<Pipeline>,
    /// Directory static requests are served from, by full request path.
    pub static_root: Option<PathBuf>,
    pub session_cookie: String,
    pub session_ttl_secs: u64,
}

/// Install with `axum::middleware::from_fn_with_state(state, run_pipeline)`.
pub async fn run_pipeline(
    State(state): State<PipelineState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut ctx = RequestContext::new(
        request.method().clone(),
        request.uri().path(),
        request.headers().clone(),
    );

    match state.pipeline.run(&mut ctx).await {
        StageOutcome::Terminate(Termination::Static) => serve_static(&state, request).await,
        StageOutcome::Terminate(Termination::Forbidden) => ApiError::access_denied().into_response(),
        StageOutcome::Terminate(Termination::Internal) => {
            ApiError::authorization_unavailable().into_response()
        }
        StageOutcome::Continue => {
            if let Some(subject) = ctx.subject.take() {
                request.extensions_mut().insert(subject);
            }
            let mut response = next.run(request).await;
            if let Some(session) = &ctx.issued_session {
                let cookie = format!(
                    "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
                    state.session_cookie, session.token, state.session_ttl_secs
                );
                match HeaderValue::from_str(&cookie) {
                    Ok(value) => {
                        response.headers_mut().append(header::SET_COOKIE, value);
                    }
                    Err(err) => tracing::warn!(error = %err, "session cookie not encodable"),
                }
            }
            response
        }
    }
}

async fn serve_static(state: &PipelineState, request: Request) -> Response {
    let Some(root) = &state.static_root else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match ServeDir::new(root).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(err) => match err {},
    }
}
