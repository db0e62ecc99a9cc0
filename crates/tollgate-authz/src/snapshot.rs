//! Immutable, compiled view of one policy generation.
//!
//! # Purpose
//! Validates model, rules, and bindings once and pre-compiles object
//! patterns so that evaluation never parses or fails on rule data.
//!
//! # How it fits
//! [`crate::PolicyEngine`] publishes a `PolicySnapshot` behind an atomic
//! pointer. Evaluators hold an `Arc` to the snapshot they loaded, so a reload
//! never changes the answer of an evaluation already in progress.
//!
//! # Key invariants
//! - Domains are isolated: rules and bindings of one domain never influence
//!   another. The wildcard is not a valid rule or binding domain.
//! - Any matching deny rule wins over any matching allow rule; no match is an
//!   implicit deny.
//! - Evaluation is a pure function of (snapshot, request).
use std::collections::{HashMap, HashSet};

use crate::{
    AccessRequest, ActionPattern, AuthzError, AuthzResult, Decision, DecisionReason, Effect,
    ObjectPattern, PolicyModel, PolicyRule, RoleBinding, RoleGraph,
};

#[derive(Debug, Clone)]
struct CompiledRule {
    position: usize,
    subject: String,
    object: ObjectPattern,
    action: ActionPattern,
    effect: Effect,
}

impl CompiledRule {
    fn matches(&self, subjects: &HashSet<String>, object: &str, action: &str) -> bool {
        (self.subject == "*" || subjects.contains(&self.subject))
            && self.action.matches(action)
            && self.object.matches(object)
    }
}

#[derive(Debug, Clone, Default)]
struct DomainPolicy {
    rules: Vec<CompiledRule>,
    roles: RoleGraph,
}

#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    version: u64,
    model: PolicyModel,
    domains: HashMap<String, DomainPolicy>,
    rule_count: usize,
    binding_count: usize,
}

fn check_field(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

fn check_domain(domain: &str) -> Result<(), String> {
    check_field(domain, "domain")?;
    if domain == "*" {
        return Err("wildcard domain is not allowed".to_string());
    }
    Ok(())
}

impl PolicySnapshot {
    pub fn compile(
        version: u64,
        model: PolicyModel,
        rules: &[PolicyRule],
        bindings: &[RoleBinding],
    ) -> AuthzResult<Self> {
        model.validate()?;

        let mut domains: HashMap<String, DomainPolicy> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            let invalid = |reason: String| AuthzError::InvalidRule { index, reason };
            check_field(&rule.subject, "subject").map_err(invalid)?;
            check_domain(&rule.domain).map_err(invalid)?;
            check_field(&rule.object, "object").map_err(invalid)?;
            check_field(&rule.action, "action").map_err(invalid)?;

            let object = ObjectPattern::compile(model.object_matcher, &rule.object).map_err(
                |err| match err {
                    AuthzError::InvalidRule { reason, .. } => AuthzError::InvalidRule { index, reason },
                    other => other,
                },
            )?;
            let policy = domains.entry(rule.domain.clone()).or_default();
            policy.rules.push(CompiledRule {
                position: policy.rules.len(),
                subject: rule.subject.clone(),
                object,
                action: ActionPattern::compile(model.action_matcher, &rule.action),
                effect: rule.effect,
            });
        }

        for (index, binding) in bindings.iter().enumerate() {
            let invalid = |reason: String| AuthzError::InvalidBinding { index, reason };
            check_field(&binding.member, "member").map_err(invalid)?;
            check_field(&binding.role, "role").map_err(invalid)?;
            check_domain(&binding.domain).map_err(invalid)?;
            if binding.role == "*" {
                return Err(invalid("wildcard role is not allowed".to_string()));
            }
            domains
                .entry(binding.domain.clone())
                .or_default()
                .roles
                .add(&binding.member, &binding.role);
        }

        Ok(Self {
            version,
            model,
            domains,
            rule_count: rules.len(),
            binding_count: bindings.len(),
        })
    }

    pub fn empty(version: u64, model: PolicyModel) -> Self {
        Self {
            version,
            model,
            domains: HashMap::new(),
            rule_count: 0,
            binding_count: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn model(&self) -> &PolicyModel {
        &self.model
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn binding_count(&self) -> usize {
        self.binding_count
    }

    pub fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.keys().cloned().collect();
        names.sort();
        names
    }

    /// Subject id, asserted roles, and every role reachable from them within
    /// `domain`.
    pub fn effective_roles(&self, subject: &str, roles: &[String], domain: &str) -> HashSet<String> {
        let seeds = std::iter::once(subject).chain(roles.iter().map(String::as_str));
        match self.domains.get(domain) {
            Some(policy) if self.model.role_inheritance => policy.roles.closure(seeds),
            _ => seeds.map(str::to_string).collect(),
        }
    }

    pub fn evaluate(&self, request: &AccessRequest) -> AuthzResult<Decision> {
        if request.subject.is_empty() {
            return Err(AuthzError::MissingContext("subject"));
        }
        if request.domain.is_empty() {
            return Err(AuthzError::MissingContext("domain"));
        }
        if request.object.is_empty() {
            return Err(AuthzError::MissingContext("object"));
        }
        if request.action.is_empty() {
            return Err(AuthzError::MissingContext("action"));
        }

        let Some(policy) = self.domains.get(&request.domain) else {
            return Ok(Decision::deny_by_default());
        };
        let subjects = self.effective_roles(&request.subject, &request.roles, &request.domain);

        let mut allowed_by = None;
        for rule in &policy.rules {
            if !rule.matches(&subjects, &request.object, &request.action) {
                continue;
            }
            match rule.effect {
                Effect::Deny => {
                    return Ok(Decision {
                        allow: false,
                        reason: DecisionReason::DenyRule(rule.position),
                    });
                }
                Effect::Allow => {
                    allowed_by.get_or_insert(rule.position);
                }
            }
        }

        Ok(match allowed_by {
            Some(position) => Decision {
                allow: true,
                reason: DecisionReason::AllowRule(position),
            },
            None => Decision::deny_by_default(),
        })
    }
}
