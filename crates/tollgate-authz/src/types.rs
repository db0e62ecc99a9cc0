//! Policy data shared by the engine, its sources, and the gateway.
//!
//! # Purpose
//! Defines the rule, role binding, and request shapes the engine evaluates,
//! plus the decision value it returns.
//!
//! # How it fits
//! Policy sources produce [`PolicyRule`] and [`RoleBinding`] values; the
//! gateway builds an [`AccessRequest`] per request and asks the engine for a
//! [`Decision`].
//!
//! # Key invariants
//! - Rules are plain configuration data; they carry no evaluation state.
//! - `AccessRequest::roles` are roles asserted by the caller (session roles)
//!   and are expanded through the role graph of the request domain only.
//!
//! # Examples
//! ```rust
//! use tollgate_authz::{AccessRequest, Effect, PolicyRule};
//!
//! let rule = PolicyRule::allow("admin", "org1", "/data/*", "GET");
//! assert_eq!(rule.effect, Effect::Allow);
//!
//! let request = AccessRequest::new("alice", "org1", "/data/x", "GET")
//!     .with_roles(vec!["admin".to_string()]);
//! assert_eq!(request.roles.len(), 1);
//! ```
use serde::{Deserialize, Serialize};

/// Outcome a rule produces when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

/// One `(subject, domain, object, action, effect)` row.
///
/// `subject` is a subject id or role name; `*` matches any subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub domain: String,
    pub object: String,
    pub action: String,
    #[serde(default)]
    pub effect: Effect,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
        effect: Effect,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
            effect,
        }
    }

    pub fn allow(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::new(subject, domain, object, action, Effect::Allow)
    }

    pub fn deny(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::new(subject, domain, object, action, Effect::Deny)
    }
}

/// `member` inherits every rule granted to `role` inside `domain`.
///
/// A member may itself be a role, which is how hierarchies are expressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub member: String,
    pub role: String,
    pub domain: String,
}

impl RoleBinding {
    pub fn new(
        member: impl Into<String>,
        role: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            member: member.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }
}

/// The question asked of the engine for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub subject: String,
    pub roles: Vec<String>,
    pub domain: String,
    pub object: String,
    pub action: String,
}

impl AccessRequest {
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            roles: Vec::new(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Why the engine decided the way it did.
///
/// Rule indices refer to the position of the rule inside its domain, in the
/// order the source supplied them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    AllowRule(usize),
    DenyRule(usize),
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub reason: DecisionReason,
}

impl Decision {
    pub fn deny_by_default() -> Self {
        Self {
            allow: false,
            reason: DecisionReason::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_defaults_to_allow_when_omitted() {
        let rule: PolicyRule = serde_yaml::from_str(
            "subject: admin\ndomain: org1\nobject: /data\naction: GET\n",
        )
        .expect("parse rule");
        assert_eq!(rule.effect, Effect::Allow);
    }

    #[test]
    fn effect_serializes_lowercase() {
        let rule = PolicyRule::deny("*", "org1", "/secret", "*");
        let yaml = serde_yaml::to_string(&rule).expect("serialize");
        assert!(yaml.contains("effect: deny"));
    }

    #[test]
    fn default_decision_is_deny() {
        let decision = Decision::deny_by_default();
        assert!(!decision.allow);
        assert_eq!(decision.reason, DecisionReason::NoMatch);
    }
}
