//! Policy engine handle with atomic snapshot reload.
//!
//! # Purpose
//! Owns the active [`PolicySnapshot`] and answers authorization questions
//! against it.
//!
//! # How it fits
//! The gateway builds one engine at boot and shares it by `Arc`. The admin
//! reload endpoint and tests call [`PolicyEngine::reload`] or
//! [`PolicyEngine::reload_from`]; request handlers call
//! [`PolicyEngine::allowed`].
//!
//! # Key invariants
//! - Readers never block: each evaluation loads one snapshot pointer and
//!   uses it to completion.
//! - Reloads are serialized and each successful one bumps the version by one.
//! - A rejected reload leaves the active snapshot untouched.
//!
//! # Examples
//! ```rust
//! use tollgate_authz::{AccessRequest, PolicyEngine, PolicyModel, PolicyRule, RoleBinding};
//!
//! let engine = PolicyEngine::new(
//!     PolicyModel::default(),
//!     vec![PolicyRule::allow("admin", "org1", "/data/*", "GET")],
//!     vec![RoleBinding::new("alice", "admin", "org1")],
//! )
//! .unwrap();
//! assert!(engine.allowed(&AccessRequest::new("alice", "org1", "/data/x", "GET")).unwrap());
//! assert!(!engine.allowed(&AccessRequest::new("alice", "org2", "/data/x", "GET")).unwrap());
//! ```
//!
//! # Common pitfalls
//! - Treating `Err` from [`PolicyEngine::allowed`] as a deny. Callers must
//!   surface it as an internal error so misconfiguration is visible.
use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{
    AccessRequest, AuthzError, AuthzResult, Decision, PolicyModel, PolicyRule, PolicySnapshot,
    PolicySource, RoleBinding,
};

pub struct PolicyEngine {
    current: ArcSwap<PolicySnapshot>,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        f.debug_struct("PolicyEngine")
            .field("version", &snapshot.version())
            .field("rules", &snapshot.rule_count())
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(
        model: PolicyModel,
        rules: Vec<PolicyRule>,
        bindings: Vec<RoleBinding>,
    ) -> AuthzResult<Self> {
        let snapshot = PolicySnapshot::compile(1, model, &rules, &bindings)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            reload_lock: Mutex::new(()),
        })
    }

    /// Engine with no rules; every request is denied until a reload.
    pub fn deny_all(model: PolicyModel) -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySnapshot::empty(1, model)),
            reload_lock: Mutex::new(()),
        }
    }

    pub async fn from_source(source: &dyn PolicySource) -> AuthzResult<Self> {
        let (model, rules, bindings) = load_all(source).await?;
        Self::new(model, rules, bindings)
    }

    pub fn allowed(&self, request: &AccessRequest) -> AuthzResult<bool> {
        self.decide(request).map(|decision| decision.allow)
    }

    pub fn decide(&self, request: &AccessRequest) -> AuthzResult<Decision> {
        let snapshot = self.current.load_full();
        let decision = snapshot.evaluate(request)?;
        tracing::debug!(
            subject = %request.subject,
            domain = %request.domain,
            object = %request.object,
            action = %request.action,
            allow = decision.allow,
            reason = ?decision.reason,
            version = snapshot.version(),
            "policy decision"
        );
        Ok(decision)
    }

    /// Compile and publish a new generation; returns its version.
    pub fn reload(
        &self,
        model: PolicyModel,
        rules: Vec<PolicyRule>,
        bindings: Vec<RoleBinding>,
    ) -> AuthzResult<u64> {
        let _guard = self.reload_lock.lock();
        let next_version = self.current.load().version() + 1;
        let snapshot = match PolicySnapshot::compile(next_version, model, &rules, &bindings) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "policy reload rejected; keeping active snapshot");
                return Err(err);
            }
        };
        tracing::info!(
            version = next_version,
            rules = snapshot.rule_count(),
            bindings = snapshot.binding_count(),
            "policy snapshot published"
        );
        self.current.store(Arc::new(snapshot));
        Ok(next_version)
    }

    pub async fn reload_from(&self, source: &dyn PolicySource) -> AuthzResult<u64> {
        let (model, rules, bindings) = load_all(source).await?;
        self.reload(model, rules, bindings)
    }

    pub fn version(&self) -> u64 {
        self.current.load().version()
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    pub fn effective_roles(&self, subject: &str, roles: &[String], domain: &str) -> HashSet<String> {
        self.current.load().effective_roles(subject, roles, domain)
    }

    pub fn anonymous_subject(&self) -> String {
        self.current.load().model().anonymous_subject.clone()
    }
}

async fn load_all(
    source: &dyn PolicySource,
) -> AuthzResult<(PolicyModel, Vec<PolicyRule>, Vec<RoleBinding>)> {
    let model = source.load_model().await?;
    let mut rules = Vec::new();
    let mut bindings = Vec::new();
    for domain in source.list_domains().await? {
        let (domain_rules, domain_bindings) = source.load_rules(&domain).await?;
        if let Some(stray) = domain_rules.iter().find(|rule| rule.domain != domain) {
            return Err(AuthzError::Source(format!(
                "source returned rule for domain {} while loading {domain}",
                stray.domain
            )));
        }
        rules.extend(domain_rules);
        bindings.extend(domain_bindings);
    }
    Ok((model, rules, bindings))
}
