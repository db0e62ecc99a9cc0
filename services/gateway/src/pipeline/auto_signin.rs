//! Auto sign-in stage.
//!
//! # Purpose
//! Resolves the acting subject: an existing session first, then a bearer
//! credential, which transparently creates a session on success.
//!
//! # Key invariants
//! - This stage never terminates. Unknown or expired sessions, failed
//!   verification, and store errors all leave the request anonymous.
//! - A verified identity backed by a deactivated local user is refused.
//! - Directory groups of the backing local user are added to the subject's
//!   roles alongside the groups carried by the credential.
//! - Subject ids are namespaced: `{directory_source}/{sub}` for
//!   directory-backed issuers, otherwise the issuer (escaped) in place of
//!   the source. The same `sub` from two issuers never shares an id.
use super::{RequestContext, Stage, StageOutcome};
use crate::auth::session::SessionStore;
use crate::auth::subject::Subject;
use crate::auth::verifier::{TokenVerifier, VerifiedIdentity, extract_bearer};
use crate::store::{UserRecord, UserStore};
use async_trait::async_trait;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "tollgate_session_id";
pub const SESSION_HEADER: &str = "x-session-token";

pub struct AutoSigninStage {
    sessions: Arc<dyn SessionStore>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    users: Arc<dyn UserStore>,
    cookie_name: String,
}

impl AutoSigninStage {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            sessions,
            verifier,
            users,
            cookie_name: SESSION_COOKIE.to_string(),
        }
    }

    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    fn session_token<'a>(&self, ctx: &'a RequestContext) -> Option<&'a str> {
        ctx.headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .or_else(|| ctx.header(SESSION_HEADER))
    }

    /// Build the subject for a verified identity, or `None` if its local
    /// record is deactivated or cannot be read.
    async fn subject_for(&self, identity: &VerifiedIdentity) -> Option<Subject> {
        let mut roles = identity.groups.clone();
        let mut local_user = None;
        let subject_id = subject_id(identity);
        if identity.directory_source.is_some() {
            let user_id = subject_id.clone();
            match self.users.get_user(&user_id).await {
                Ok(Some(user)) if !user.active => {
                    tracing::info!(%user_id, "sign-in refused for deactivated user");
                    return None;
                }
                Ok(Some(user)) => {
                    for group in user.directory.groups {
                        if !roles.contains(&group) {
                            roles.push(group);
                        }
                    }
                    local_user = Some(user.id);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(%user_id, error = %err, "user lookup failed during sign-in");
                    return None;
                }
            }
        }
        let subject = Subject::new(subject_id, identity.domain.clone(), roles);
        Some(match local_user {
            Some(user_id) => subject.with_user_id(user_id),
            None => subject,
        })
    }
}

/// Policy subject id for a verified identity. Directory-backed identities use
/// their local user id.
pub fn subject_id(identity: &VerifiedIdentity) -> String {
    let namespace = identity
        .directory_source
        .as_deref()
        .unwrap_or(&identity.issuer);
    UserRecord::user_id(namespace, &identity.subject)
}

#[async_trait]
impl Stage for AutoSigninStage {
    fn name(&self) -> &'static str {
        "auto_signin"
    }

    async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        if let Some(token) = self.session_token(ctx).map(str::to_string)
            && let Some(subject) = self.sessions.validate_session(&token).await
        {
            ctx.subject = Some(subject);
            return StageOutcome::Continue;
        }

        let Some(verifier) = &self.verifier else {
            return StageOutcome::Continue;
        };
        let Some(bearer) = extract_bearer(&ctx.headers).map(str::to_string) else {
            return StageOutcome::Continue;
        };
        let identity = match verifier.verify(&bearer).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::debug!(error = %err, "bearer verification failed; continuing anonymously");
                return StageOutcome::Continue;
            }
        };
        if let Some(subject) = self.subject_for(&identity).await {
            let session = self.sessions.create_session(subject).await;
            tracing::info!(
                subject = %session.subject.id,
                principal_id = %identity.principal_id,
                issuer = %identity.issuer,
                "auto sign-in created session"
            );
            ctx.subject = Some(session.subject.clone());
            ctx.issued_session = Some(session);
        }
        StageOutcome::Continue
    }
}
