#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use gateway::api::types::ErrorResponse;
use gateway::app::{AppState, build_pipeline, build_router};
use gateway::audit::{AuditEntry, AuditRecorder, MemoryAuditSink};
use gateway::auth::oidc::OidcError;
use gateway::auth::session::InMemorySessionStore;
use gateway::auth::verifier::{TokenVerifier, VerifiedIdentity};
use gateway::directory::DirectorySynchronizer;
use gateway::pipeline::{
    AuthorizeStage, AutoSigninStage, PipelineConfig, RequestContext, Stage, StageOutcome,
    StaticBypassStage,
};
use gateway::store::memory::InMemoryUserStore;
use gateway::store::policy::InMemoryPolicyStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tollgate_authz::{PolicyDocument, PolicyEngine};

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub async fn read_error(response: axum::response::Response) -> ErrorResponse {
    serde_json::from_value(read_json(response).await).expect("error body")
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("request")
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Accepts `Bearer <token>` for the identities it was built with.
#[derive(Default)]
pub struct StaticTokenVerifier {
    identities: HashMap<String, VerifiedIdentity>,
}

impl StaticTokenVerifier {
    pub fn with_identity(
        mut self,
        token: &str,
        subject: &str,
        domain: &str,
        groups: &[&str],
        directory_source: Option<&str>,
    ) -> Self {
        self.identities.insert(
            token.to_string(),
            VerifiedIdentity {
                issuer: "https://idp.test".to_string(),
                subject: subject.to_string(),
                principal_id: gateway::auth::verifier::principal_id("https://idp.test", subject),
                groups: groups.iter().map(|group| group.to_string()).collect(),
                email: None,
                domain: Some(domain.to_string()),
                directory_source: directory_source.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity, OidcError> {
        self.identities
            .get(bearer)
            .cloned()
            .ok_or(OidcError::IssuerNotAllowed)
    }
}

/// Wraps a stage and counts how often it runs.
pub struct Counting<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl<S: Stage> Stage for Counting<S> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(ctx).await
    }
}

pub struct Harness {
    pub router: Router,
    pub engine: Arc<PolicyEngine>,
    pub policy: InMemoryPolicyStore,
    pub users: Arc<InMemoryUserStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub audit: MemoryAuditSink,
    pub authorize_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub async fn audit_entries(&self, expected: usize) -> Vec<AuditEntry> {
        let audit = self.audit.clone();
        eventually(|| {
            let audit = audit.clone();
            async move { audit.entries().await.len() >= expected }
        })
        .await;
        self.audit.entries().await
    }
}

pub struct HarnessBuilder {
    policy_yaml: String,
    verifier: StaticTokenVerifier,
    static_root: Option<PathBuf>,
    default_domain: Option<String>,
}

impl HarnessBuilder {
    pub fn new(policy_yaml: &str) -> Self {
        Self {
            policy_yaml: policy_yaml.to_string(),
            verifier: StaticTokenVerifier::default(),
            static_root: None,
            default_domain: None,
        }
    }

    pub fn verifier(mut self, verifier: StaticTokenVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn static_root(mut self, root: PathBuf) -> Self {
        self.static_root = Some(root);
        self
    }

    pub fn default_domain(mut self, domain: &str) -> Self {
        self.default_domain = Some(domain.to_string());
        self
    }

    pub async fn build(self) -> Harness {
        let policy =
            InMemoryPolicyStore::new(PolicyDocument::from_yaml(&self.policy_yaml).expect("policy"));
        let engine = Arc::new(PolicyEngine::from_source(&policy).await.expect("engine"));
        let users = Arc::new(InMemoryUserStore::new());
        let sessions = Arc::new(InMemorySessionStore::default());
        let audit = MemoryAuditSink::new();
        let (recorder, writer) = AuditRecorder::channel(64, Arc::new(audit.clone()));
        writer.spawn();

        let authorize_calls = Arc::new(AtomicUsize::new(0));
        let authorize = AuthorizeStage::new(engine.clone())
            .with_default_domain(self.default_domain.clone());
        let counted: Arc<dyn Stage> = Arc::new(Counting {
            inner: authorize,
            calls: authorize_calls.clone(),
        });
        let static_bypass: Arc<dyn Stage> = Arc::new(StaticBypassStage::default());
        let verifier: Arc<dyn TokenVerifier> = Arc::new(self.verifier);
        let auto_signin: Arc<dyn Stage> = Arc::new(AutoSigninStage::new(
            sessions.clone(),
            Some(verifier),
            users.clone(),
        ));
        let pipeline = gateway::pipeline::Pipeline::new(
            vec![static_bypass, auto_signin, counted],
            Some(recorder),
            engine.anonymous_subject(),
        );

        let state = AppState {
            engine: engine.clone(),
            policy_source: Arc::new(policy.clone()),
            users: users.clone(),
            sessions: sessions.clone(),
            synchronizer: Arc::new(DirectorySynchronizer::new(
                users.clone(),
                Duration::from_secs(60),
            )),
            pipeline: Arc::new(pipeline),
            static_root: self.static_root,
            session_cookie: "tollgate_session_id".to_string(),
            session_ttl_secs: 3600,
        };
        Harness {
            router: build_router(state),
            engine,
            policy,
            users,
            sessions,
            audit,
            authorize_calls,
        }
    }
}

/// Builds the default pipeline through the public wiring helper.
pub fn default_pipeline(engine: Arc<PolicyEngine>) -> gateway::pipeline::Pipeline {
    build_pipeline(
        &PipelineConfig::default(),
        StaticBypassStage::default(),
        AutoSigninStage::new(
            Arc::new(InMemorySessionStore::default()),
            None,
            Arc::new(InMemoryUserStore::new()),
        ),
        AuthorizeStage::new(engine.clone()),
        None,
        engine.anonymous_subject(),
    )
    .expect("pipeline")
}
