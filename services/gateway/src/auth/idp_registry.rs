//! Identity provider issuer configuration.
//!
//! # Purpose
//! Describes which upstream issuers may sign bearer credentials, how their
//! claims map onto a subject, and which tenant and directory source a
//! verified identity belongs to.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimMappings {
    pub subject_claim: String,
    pub groups_claim: Option<String>,
    pub email_claim: Option<String>,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            subject_claim: "sub".to_string(),
            groups_claim: None,
            email_claim: Some("email".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpIssuerConfig {
    pub issuer: String,
    pub audiences: Vec<String>,
    #[serde(default)]
    pub discovery_url: Option<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub claim_mappings: ClaimMappings,
    /// Tenant the verified subject signs in to.
    #[serde(default)]
    pub domain: Option<String>,
    /// Directory source whose records back this issuer's subjects. The local
    /// user id, and the policy subject id, is `"{directory_source}/{subject}"`;
    /// without one the subject id is namespaced by the issuer.
    #[serde(default)]
    pub directory_source: Option<String>,
}
