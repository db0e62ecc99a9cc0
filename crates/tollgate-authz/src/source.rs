//! Where policy generations come from.
//!
//! # Purpose
//! Abstracts the store that holds the model, rules, and role bindings so the
//! engine can rebuild a snapshot from any backend.
//!
//! # Key invariants
//! - Rules returned for a domain all carry that domain.
//! - A source failure is reported as [`AuthzError::Source`] and never
//!   replaces the active snapshot.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AuthzError, AuthzResult, PolicyModel, PolicyRule, RoleBinding};

#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn load_model(&self) -> AuthzResult<PolicyModel>;
    async fn list_domains(&self) -> AuthzResult<Vec<String>>;
    async fn load_rules(&self, domain: &str) -> AuthzResult<(Vec<PolicyRule>, Vec<RoleBinding>)>;
}

/// Serialized policy generation: model, rules, and bindings in one document.
///
/// ```yaml
/// model:
///   object_matcher: key_match2
/// rules:
///   - { subject: admin, domain: org1, object: "/data/*", action: GET }
/// bindings:
///   - { member: alice, role: admin, domain: org1 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub model: PolicyModel,
    pub rules: Vec<PolicyRule>,
    pub bindings: Vec<RoleBinding>,
}

impl PolicyDocument {
    pub fn from_yaml(raw: &str) -> AuthzResult<Self> {
        let doc: Self =
            serde_yaml::from_str(raw).map_err(|err| AuthzError::InvalidModel(err.to_string()))?;
        doc.model.validate()?;
        Ok(doc)
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .rules
            .iter()
            .map(|rule| rule.domain.clone())
            .chain(self.bindings.iter().map(|binding| binding.domain.clone()))
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }

    pub fn rules_for(&self, domain: &str) -> (Vec<PolicyRule>, Vec<RoleBinding>) {
        let rules = self
            .rules
            .iter()
            .filter(|rule| rule.domain == domain)
            .cloned()
            .collect();
        let bindings = self
            .bindings
            .iter()
            .filter(|binding| binding.domain == domain)
            .cloned()
            .collect();
        (rules, bindings)
    }
}

#[async_trait]
impl PolicySource for PolicyDocument {
    async fn load_model(&self) -> AuthzResult<PolicyModel> {
        Ok(self.model.clone())
    }

    async fn list_domains(&self) -> AuthzResult<Vec<String>> {
        Ok(self.domains())
    }

    async fn load_rules(&self, domain: &str) -> AuthzResult<(Vec<PolicyRule>, Vec<RoleBinding>)> {
        Ok(self.rules_for(domain))
    }
}
