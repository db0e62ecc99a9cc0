//! Ordered request-filter pipeline.
//!
//! # Purpose
//! Runs the interceptors every request passes before routing: static
//! bypass, auto sign-in, and authorization, followed by the audit finalizer.
//!
//! # How it fits
//! `app::build_router` installs [`middleware::pipeline_layer`] around the
//! route table. The middleware builds a [`RequestContext`], calls
//! [`Pipeline::run`], and turns a [`Termination`] into a response.
//!
//! # Key invariants
//! - Stages run strictly in configured order; a termination skips every
//!   later stage.
//! - A static termination skips audit as well; every other request produces
//!   exactly one audit entry, including requests cancelled mid-pipeline.
//! - Authorization fails closed: an engine error terminates with 500.
//!
//! # Important configuration
//! - [`PipelineConfig::stages`] is the stage order. `authorize` is mandatory.
use crate::audit::{AuditEntry, AuditRecorder, Outcome};
use crate::auth::session::Session;
use crate::auth::subject::Subject;
use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub mod audit;
pub mod authorize;
pub mod auto_signin;
pub mod middleware;
pub mod static_bypass;

pub use authorize::AuthorizeStage;
pub use auto_signin::AutoSigninStage;
pub use static_bypass::StaticBypassStage;

use audit::AuditGuard;

/// Per-request state threaded through the stages.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub subject: Option<Subject>,
    pub domain: Option<String>,
    pub outcome: Option<Outcome>,
    /// Session issued by auto sign-in during this request.
    pub issued_session: Option<Session>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            subject: None,
            domain: None,
            outcome: None,
            issued_session: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Static,
    Forbidden,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Terminate(Termination),
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &mut RequestContext) -> StageOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    StaticBypass,
    AutoSignin,
    Authorize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageKind::StaticBypass,
                StageKind::AutoSignin,
                StageKind::Authorize,
            ],
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(*stage) {
                anyhow::bail!("pipeline stage {stage:?} listed more than once");
            }
        }
        if !seen.contains(&StageKind::Authorize) {
            anyhow::bail!("pipeline must include the authorize stage");
        }
        Ok(())
    }
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    recorder: Option<AuditRecorder>,
    anonymous_subject: String,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        recorder: Option<AuditRecorder>,
        anonymous_subject: impl Into<String>,
    ) -> Self {
        Self {
            stages,
            recorder,
            anonymous_subject: anonymous_subject.into(),
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        let mut guard = AuditGuard::new(self.recorder.clone(), ctx, &self.anonymous_subject);
        for stage in &self.stages {
            let outcome = stage.run(ctx).await;
            guard.observe(ctx);
            if let StageOutcome::Terminate(termination) = outcome {
                tracing::debug!(stage = stage.name(), ?termination, path = %ctx.path, "pipeline terminated");
                match termination {
                    Termination::Static => guard.disarm(),
                    Termination::Forbidden => guard.finish(Outcome::Denied),
                    Termination::Internal => guard.finish(Outcome::Error),
                }
                return outcome;
            }
        }
        guard.finish(ctx.outcome.unwrap_or(Outcome::Allowed));
        StageOutcome::Continue
    }
}
