//! Bearer credential verification contract.
use crate::auth::oidc::OidcError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Identity extracted from a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub issuer: String,
    pub subject: String,
    pub principal_id: String,
    pub groups: Vec<String>,
    pub email: Option<String>,
    pub domain: Option<String>,
    pub directory_source: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity, OidcError>;
}

/// Stable, opaque id for an `(issuer, subject)` pair.
pub fn principal_id(issuer: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issuer.as_bytes());
    hasher.update(b"|");
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn extract_bearer(headers: &axum::http::HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};

    #[test]
    fn principal_id_is_stable_and_input_sensitive() {
        assert_eq!(
            principal_id("https://issuer", "sub"),
            principal_id("https://issuer", "sub")
        );
        assert_ne!(
            principal_id("https://issuer", "sub"),
            principal_id("https://issuer", "sub2")
        );
        assert_eq!(principal_id("a", "b").len(), 64);
    }

    #[test]
    fn extract_bearer_accepts_any_scheme_case() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  xyz "));
        assert_eq!(extract_bearer(&headers), Some("xyz"));
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer(&headers), None);
    }
}
