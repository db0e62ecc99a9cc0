//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, installs the request pipeline in front of it, and
//! assembles the shared state and background collaborators from config.
//!
//! # Notes
//! `build_gateway` keeps wiring testable: tests drive the returned router with
//! `oneshot` and own the audit writer and synchronizer themselves.
use crate::api;
use crate::audit::{AuditRecorder, AuditSink, AuditWriter, JsonLinesAuditSink, TracingAuditSink};
use crate::auth::oidc::OidcVerifier;
use crate::auth::session::{InMemorySessionStore, SessionStore};
use crate::auth::verifier::TokenVerifier;
use crate::config::GatewayConfig;
use crate::directory::{DirectorySynchronizer, HttpDirectorySource};
use crate::observability;
use crate::pipeline::middleware::{PipelineState, run_pipeline};
use crate::pipeline::{
    AuthorizeStage, AutoSigninStage, Pipeline, PipelineConfig, Stage, StageKind,
    StaticBypassStage,
};
use crate::store::UserStore;
use crate::store::memory::InMemoryUserStore;
use crate::store::policy::{InMemoryPolicyStore, YamlPolicyFile};
use anyhow::Context;
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tollgate_authz::{PolicyEngine, PolicySource};
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PolicyEngine>,
    pub policy_source: Arc<dyn PolicySource>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub synchronizer: Arc<DirectorySynchronizer>,
    pub pipeline: Arc<Pipeline>,
    pub static_root: Option<PathBuf>,
    pub session_cookie: String,
    pub session_ttl_secs: u64,
}

/// Shared state plus the background pieces the caller must run.
pub struct Gateway {
    pub state: AppState,
    pub audit_writer: AuditWriter,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });
    let pipeline_state = PipelineState {
        pipeline: state.pipeline.clone(),
        static_root: state.static_root.clone(),
        session_cookie: state.session_cookie.clone(),
        session_ttl_secs: state.session_ttl_secs,
    };

    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route("/v1/me", axum::routing::get(api::me::get_me))
        .route(
            "/v1/me/preferences",
            axum::routing::put(api::me::put_preferences),
        )
        .route(
            "/v1/admin/policy/reload",
            axum::routing::post(api::admin::reload_policy),
        )
        .route("/v1/admin/sync", axum::routing::post(api::admin::sync_all))
        .route(
            "/v1/admin/sync/status",
            axum::routing::get(api::admin::sync_status),
        )
        .route(
            "/v1/admin/sync/:source_id",
            axum::routing::post(api::admin::sync_source),
        )
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            pipeline_state,
            run_pipeline,
        ))
        .layer(trace_layer)
}

/// Instantiate the configured stages in order.
pub fn build_pipeline(
    config: &PipelineConfig,
    static_bypass: StaticBypassStage,
    auto_signin: AutoSigninStage,
    authorize: AuthorizeStage,
    recorder: Option<AuditRecorder>,
    anonymous_subject: String,
) -> anyhow::Result<Pipeline> {
    config.validate()?;
    let static_bypass: Arc<dyn Stage> = Arc::new(static_bypass);
    let auto_signin: Arc<dyn Stage> = Arc::new(auto_signin);
    let authorize: Arc<dyn Stage> = Arc::new(authorize);
    let stages = config
        .stages
        .iter()
        .map(|kind| match kind {
            StageKind::StaticBypass => static_bypass.clone(),
            StageKind::AutoSignin => auto_signin.clone(),
            StageKind::Authorize => authorize.clone(),
        })
        .collect();
    Ok(Pipeline::new(stages, recorder, anonymous_subject))
}

pub async fn build_gateway(config: &GatewayConfig) -> anyhow::Result<Gateway> {
    let policy_source: Arc<dyn PolicySource> = match &config.policy_file {
        Some(path) => Arc::new(YamlPolicyFile::new(path)),
        None => {
            tracing::warn!("no policy file configured; every request will be denied");
            Arc::new(InMemoryPolicyStore::default())
        }
    };
    let users: Arc<dyn UserStore> = Arc::new(InMemoryUserStore::new());
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
        Duration::from_secs(config.session_ttl_secs),
    ));
    build_gateway_with(config, policy_source, users, sessions).await
}

/// Like [`build_gateway`] with caller-supplied stores.
pub async fn build_gateway_with(
    config: &GatewayConfig,
    policy_source: Arc<dyn PolicySource>,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
) -> anyhow::Result<Gateway> {
    config.validate()?;
    let engine = Arc::new(
        PolicyEngine::from_source(policy_source.as_ref())
            .await
            .context("load policy")?,
    );

    let sink: Arc<dyn AuditSink> = match &config.audit_log {
        Some(path) => Arc::new(
            JsonLinesAuditSink::open(path)
                .await
                .with_context(|| format!("open audit log {}", path.display()))?,
        ),
        None => Arc::new(TracingAuditSink),
    };
    let (recorder, audit_writer) = AuditRecorder::channel(config.audit_queue_capacity, sink);

    let verifier: Option<Arc<dyn TokenVerifier>> = if config.issuers.is_empty() {
        None
    } else {
        Some(Arc::new(OidcVerifier::new(config.issuers.clone())))
    };

    let pipeline = build_pipeline(
        &config.pipeline,
        StaticBypassStage::new(config.static_prefixes.iter().cloned()),
        AutoSigninStage::new(sessions.clone(), verifier, users.clone())
            .with_cookie_name(config.session_cookie.clone()),
        AuthorizeStage::new(engine.clone())
            .with_tenant_header(config.tenant_header.clone())
            .with_default_domain(config.default_domain.clone()),
        Some(recorder),
        engine.anonymous_subject(),
    )?;

    let mut synchronizer = DirectorySynchronizer::new(users.clone(), config.sync.interval);
    for source in &config.sync.sources {
        let http = HttpDirectorySource::new(
            source.id.clone(),
            source.url.clone(),
            Duration::from_millis(source.timeout_ms),
        )
        .with_context(|| format!("build directory source {}", source.id))?;
        synchronizer = synchronizer.with_source(
            Arc::new(http),
            source.interval_secs.map(Duration::from_secs),
            source.enabled,
        );
    }

    tracing::info!(
        policy_version = engine.version(),
        stages = ?pipeline.stage_names(),
        sources = config.sync.sources.len(),
        "gateway assembled"
    );

    Ok(Gateway {
        state: AppState {
            engine,
            policy_source,
            users,
            sessions,
            synchronizer: Arc::new(synchronizer),
            pipeline: Arc::new(pipeline),
            static_root: config.static_root.clone(),
            session_cookie: config.session_cookie.clone(),
            session_ttl_secs: config.session_ttl_secs,
        },
        audit_writer,
    })
}
