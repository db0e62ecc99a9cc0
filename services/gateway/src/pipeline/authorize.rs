//! Authorization stage.
//!
//! Resolves the tenant domain (tenant header, then the subject's own domain,
//! then the configured default) and asks the policy engine whether the
//! subject may perform `method` on `path`. Denials terminate with 403 and
//! engine errors with 500.
use super::{RequestContext, Stage, StageOutcome, Termination};
use crate::audit::Outcome;
use async_trait::async_trait;
use std::sync::Arc;
use tollgate_authz::{AccessRequest, PolicyEngine};

pub const DEFAULT_TENANT_HEADER: &str = "x-tenant-id";

pub struct AuthorizeStage {
    engine: Arc<PolicyEngine>,
    tenant_header: String,
    default_domain: Option<String>,
}

impl AuthorizeStage {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self {
            engine,
            tenant_header: DEFAULT_TENANT_HEADER.to_string(),
            default_domain: None,
        }
    }

    pub fn with_tenant_header(mut self, header: impl Into<String>) -> Self {
        self.tenant_header = header.into().to_ascii_lowercase();
        self
    }

    pub fn with_default_domain(mut self, domain: Option<String>) -> Self {
        self.default_domain = domain.filter(|domain| !domain.trim().is_empty());
        self
    }

    fn resolve_domain(&self, ctx: &RequestContext) -> Option<String> {
        ctx.header(&self.tenant_header)
            .map(str::to_string)
            .or_else(|| ctx.subject.as_ref().and_then(|subject| subject.domain.clone()))
            .or_else(|| self.default_domain.clone())
    }
}

#[async_trait]
impl Stage for AuthorizeStage {
    fn name(&self) -> &'static str {
        "authorize"
    }

    async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        let domain = self.resolve_domain(ctx);
        ctx.domain = domain.clone();

        let (subject, roles) = match &ctx.subject {
            Some(subject) => {
                let roles = domain
                    .as_deref()
                    .map(|domain| subject.roles_for(domain).to_vec())
                    .unwrap_or_default();
                (subject.id.clone(), roles)
            }
            None => (self.engine.anonymous_subject(), Vec::new()),
        };
        // A missing domain reaches the engine as an empty string and fails closed.
        let request = AccessRequest::new(
            subject,
            domain.unwrap_or_default(),
            ctx.path.clone(),
            ctx.method.as_str(),
        )
        .with_roles(roles);

        match self.engine.allowed(&request) {
            Ok(true) => {
                ctx.outcome = Some(Outcome::Allowed);
                metrics::counter!("tollgate_authz_decisions_total", "outcome" => "allowed")
                    .increment(1);
                StageOutcome::Continue
            }
            Ok(false) => {
                ctx.outcome = Some(Outcome::Denied);
                metrics::counter!("tollgate_authz_decisions_total", "outcome" => "denied")
                    .increment(1);
                StageOutcome::Terminate(Termination::Forbidden)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    subject = %request.subject,
                    object = %request.object,
                    "authorization failed closed"
                );
                ctx.outcome = Some(Outcome::Error);
                metrics::counter!("tollgate_authz_decisions_total", "outcome" => "error")
                    .increment(1);
                StageOutcome::Terminate(Termination::Internal)
            }
        }
    }
}
