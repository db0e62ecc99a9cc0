use casbin::function_map::key_match2;
use regex::Regex;

use crate::{AuthzError, AuthzResult};

pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let (mut p_idx, mut v_idx) = (0usize, 0usize);
    let (mut star_idx, mut match_idx) = (None, 0usize);
    let pattern_bytes = pattern.as_bytes();
    let value_bytes = value.as_bytes();

    while v_idx < value_bytes.len() {
        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = v_idx;
            p_idx += 1;
            continue;
        }

        if p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == value_bytes[v_idx] {
            p_idx += 1;
            v_idx += 1;
            continue;
        }

        if let Some(star) = star_idx {
            p_idx = star + 1;
            match_idx += 1;
            v_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < pattern_bytes.len() && pattern_bytes[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == pattern_bytes.len()
}

/// Check a `key_match2` object pattern at load time.
///
/// Matching is casbin's `key_match2`: `/*` becomes `/.*`, `:name` becomes
/// `[^/]+`, and the result is used as an anchored regex, which casbin
/// compiles per call and panics on if invalid. Every rule object goes through
/// here first so a bad pattern fails the reload instead.
pub fn validate_key_match2(pattern: &str) -> Result<(), String> {
    for (idx, _) in pattern.match_indices(':') {
        let named = pattern[idx + 1..]
            .chars()
            .next()
            .is_some_and(|next| next.is_ascii_alphanumeric() || next == '_');
        if !named {
            return Err(format!("parameter at byte {idx} has no name"));
        }
    }
    let expr = pattern
        .replace("/*", "/.*")
        .split('/')
        .map(|segment| match segment.find(':') {
            Some(at) => format!("{}[^/]+", &segment[..at]),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/");
    Regex::new(&format!("^{expr}$"))
        .map(|_| ())
        .map_err(|err| err.to_string())
}

/// Object matching strategy selected by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectMatcher {
    Exact,
    Wildcard,
    #[default]
    KeyMatch2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMatcher {
    #[default]
    Exact,
    Wildcard,
}

/// A rule object compiled for the active matcher.
#[derive(Debug, Clone)]
pub enum ObjectPattern {
    Any,
    Exact(String),
    Wildcard(String),
    KeyMatch2(String),
}

impl ObjectPattern {
    pub fn compile(matcher: ObjectMatcher, pattern: &str) -> AuthzResult<Self> {
        if pattern == "*" {
            return Ok(Self::Any);
        }
        match matcher {
            ObjectMatcher::Exact => Ok(Self::Exact(pattern.to_string())),
            ObjectMatcher::Wildcard => Ok(Self::Wildcard(pattern.to_string())),
            ObjectMatcher::KeyMatch2 => validate_key_match2(pattern)
                .map(|()| Self::KeyMatch2(pattern.to_string()))
                .map_err(|reason| AuthzError::InvalidRule {
                    index: 0,
                    reason: format!("object {pattern:?}: {reason}"),
                }),
        }
    }

    pub fn matches(&self, object: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(pattern) => pattern == object,
            Self::Wildcard(pattern) => wildcard_match(pattern, object),
            Self::KeyMatch2(pattern) => key_match2(object, pattern),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPattern {
    Any,
    Exact(String),
    Wildcard(String),
}

impl ActionPattern {
    pub fn compile(matcher: ActionMatcher, pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Any;
        }
        match matcher {
            ActionMatcher::Exact => Self::Exact(pattern.to_string()),
            ActionMatcher::Wildcard => Self::Wildcard(pattern.to_string()),
        }
    }

    // HTTP methods are case-insensitive on the rule side only.
    pub fn matches(&self, action: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(pattern) => pattern.eq_ignore_ascii_case(action),
            Self::Wildcard(pattern) => wildcard_match(pattern, action),
        }
    }
}
