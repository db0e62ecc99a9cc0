//! Authorization model: how rules are matched against requests.
//!
//! # Purpose
//! Captures the matcher choices that used to live in a textual model
//! definition (`g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch2(...)`)
//! as a typed, validated structure.
//!
//! # Key invariants
//! - The default model matches objects with `key_match2`, actions exactly,
//!   and resolves roles through domain-scoped bindings.
//! - `anonymous_subject` is never empty.
//!
//! # Examples
//! ```rust
//! use tollgate_authz::{ObjectMatcher, PolicyModel};
//!
//! let model = PolicyModel::from_yaml("object_matcher: wildcard\n").unwrap();
//! assert_eq!(model.object_matcher, ObjectMatcher::Wildcard);
//! assert!(model.role_inheritance);
//! ```
use serde::{Deserialize, Serialize};

use crate::{ActionMatcher, AuthzError, AuthzResult, ObjectMatcher};

pub const DEFAULT_ANONYMOUS_SUBJECT: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyModel {
    pub object_matcher: ObjectMatcher,
    pub action_matcher: ActionMatcher,
    pub role_inheritance: bool,
    pub anonymous_subject: String,
}

impl Default for PolicyModel {
    fn default() -> Self {
        Self {
            object_matcher: ObjectMatcher::KeyMatch2,
            action_matcher: ActionMatcher::Exact,
            role_inheritance: true,
            anonymous_subject: DEFAULT_ANONYMOUS_SUBJECT.to_string(),
        }
    }
}

impl PolicyModel {
    pub fn from_yaml(raw: &str) -> AuthzResult<Self> {
        let model: Self =
            serde_yaml::from_str(raw).map_err(|err| AuthzError::InvalidModel(err.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> AuthzResult<()> {
        if self.anonymous_subject.trim().is_empty() {
            return Err(AuthzError::InvalidModel(
                "anonymous_subject must not be empty".to_string(),
            ));
        }
        if self.anonymous_subject == "*" {
            return Err(AuthzError::InvalidModel(
                "anonymous_subject must not be the wildcard".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_matches_path_templates() {
        let model = PolicyModel::default();
        assert_eq!(model.object_matcher, ObjectMatcher::KeyMatch2);
        assert_eq!(model.action_matcher, ActionMatcher::Exact);
        assert_eq!(model.anonymous_subject, "anonymous");
        assert!(model.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let model = PolicyModel::from_yaml(
            "action_matcher: wildcard\nrole_inheritance: false\nanonymous_subject: guest\n",
        )
        .expect("model");
        assert_eq!(model.action_matcher, ActionMatcher::Wildcard);
        assert!(!model.role_inheritance);
        assert_eq!(model.anonymous_subject, "guest");
        assert_eq!(model.object_matcher, ObjectMatcher::KeyMatch2);
    }

    #[test]
    fn unknown_matcher_is_invalid_model() {
        let err = PolicyModel::from_yaml("object_matcher: regex\n").expect_err("invalid");
        assert!(matches!(err, AuthzError::InvalidModel(_)));
    }

    #[test]
    fn empty_anonymous_subject_is_rejected() {
        let err = PolicyModel::from_yaml("anonymous_subject: \"  \"\n").expect_err("invalid");
        assert!(matches!(err, AuthzError::InvalidModel(_)));
    }
}
