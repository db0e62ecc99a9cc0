//! OIDC bearer verification with cached discovery and JWKS fetching.
//!
//! # Purpose
//! Verifies upstream identity-provider tokens for the auto sign-in stage and
//! maps their claims onto a [`VerifiedIdentity`].
//!
//! # Key invariants
//! - Only ES256 is accepted by default; RS256 is allowed only when the
//!   `oidc-rsa` feature is enabled.
//! - Issuer, audience, signature, `exp`, and `iat` are all checked before any
//!   claim is trusted. The unverified payload is read only to pick the issuer.
//! - JWKS and discovery documents are cached per URL with a TTL; an unknown
//!   `kid` forces one JWKS refresh to follow key rotation.
//!
//! # Concurrency model
//! Caches live in `DashMap`s so concurrent requests never serialize on a
//! global lock. Clones share caches.
//!
//! # Security model
//! - Attackers may craft tokens; a token from an unconfigured issuer is
//!   rejected before any network fetch.
//! - Error values never carry token contents.
use crate::auth::idp_registry::IdpIssuerConfig;
use crate::auth::verifier::{TokenVerifier, VerifiedIdentity, principal_id};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    #[error("missing issuer")]
    MissingIssuer,
    #[error("issuer not allowed")]
    IssuerNotAllowed,
    #[error("missing subject")]
    MissingSubject,
    #[error("missing key id")]
    MissingKeyId,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid jwk: {0}")]
    InvalidJwk(String),
    #[error("jwks key not found")]
    JwksKeyNotFound,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct CachedDiscovery {
    jwks_url: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// Verifier for the configured set of upstream issuers.
///
/// ```rust
/// use gateway::auth::oidc::OidcVerifier;
/// use std::time::Duration;
///
/// let verifier = OidcVerifier::new(Vec::new())
///     .with_cache_ttls(Duration::from_secs(300), Duration::from_secs(300))
///     .with_clock_skew(30);
/// assert!(verifier.issuers().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct OidcVerifier {
    client: reqwest::Client,
    issuers: Arc<Vec<IdpIssuerConfig>>,
    jwks_cache: Arc<DashMap<String, CachedJwks>>,
    discovery_cache: Arc<DashMap<String, CachedDiscovery>>,
    jwks_ttl: Duration,
    discovery_ttl: Duration,
    clock_skew_seconds: u64,
}

impl OidcVerifier {
    pub fn new(issuers: Vec<IdpIssuerConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            issuers: Arc::new(issuers),
            jwks_cache: Arc::new(DashMap::new()),
            discovery_cache: Arc::new(DashMap::new()),
            jwks_ttl: Duration::from_secs(3600),
            discovery_ttl: Duration::from_secs(3600),
            clock_skew_seconds: 60,
        }
    }

    pub fn with_cache_ttls(mut self, jwks_ttl: Duration, discovery_ttl: Duration) -> Self {
        self.jwks_ttl = jwks_ttl;
        self.discovery_ttl = discovery_ttl;
        self
    }

    pub fn with_clock_skew(mut self, clock_skew_seconds: u64) -> Self {
        self.clock_skew_seconds = clock_skew_seconds;
        self
    }

    pub fn issuers(&self) -> &[IdpIssuerConfig] {
        &self.issuers
    }

    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, OidcError> {
        let header = decode_header(token)?;
        if !is_algorithm_allowed(header.alg) {
            return Err(OidcError::UnsupportedAlgorithm);
        }
        let kid = header.kid.as_deref().ok_or(OidcError::MissingKeyId)?;

        let unverified = decode_unverified_claims(token)?;
        let issuer = extract_string_claim(&unverified, "iss").ok_or(OidcError::MissingIssuer)?;
        let issuer_cfg = self
            .issuers
            .iter()
            .find(|cfg| cfg.issuer == issuer)
            .ok_or(OidcError::IssuerNotAllowed)?;

        let jwks_url = self.resolve_jwks_url(&issuer, issuer_cfg).await?;
        let jwks = self.get_jwks(&jwks_url).await?;
        let decoding_key = match find_jwk(&jwks, kid) {
            Some(key) => {
                ensure_jwk_matches_algorithm(key, header.alg)?;
                DecodingKey::from_jwk(key)?
            }
            None => {
                let refreshed = self.refresh_jwks(&jwks_url).await?;
                let key = find_jwk(&refreshed, kid).ok_or(OidcError::JwksKeyNotFound)?;
                ensure_jwk_matches_algorithm(key, header.alg)?;
                DecodingKey::from_jwk(key)?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer_cfg.issuer.as_str()]);
        validation.set_audience(&issuer_cfg.audiences);
        validation
            .required_spec_claims
            .extend(["iss".to_string(), "aud".to_string()]);
        validation.leeway = self.clock_skew_seconds;

        let token = decode::<Value>(token, &decoding_key, &validation)?;
        validate_iat(&token.claims, self.clock_skew_seconds)?;

        let mappings = &issuer_cfg.claim_mappings;
        let subject = extract_string_claim(&token.claims, &mappings.subject_claim)
            .ok_or(OidcError::MissingSubject)?;
        let groups = extract_groups_claim(&token.claims, mappings.groups_claim.as_deref());
        let email = mappings
            .email_claim
            .as_deref()
            .and_then(|claim| extract_string_claim(&token.claims, claim));

        Ok(VerifiedIdentity {
            principal_id: principal_id(&issuer, &subject),
            issuer,
            subject,
            groups,
            email,
            domain: issuer_cfg.domain.clone(),
            directory_source: issuer_cfg.directory_source.clone(),
        })
    }

    async fn resolve_jwks_url(
        &self,
        issuer: &str,
        issuer_cfg: &IdpIssuerConfig,
    ) -> Result<String, OidcError> {
        if let Some(url) = &issuer_cfg.jwks_url {
            return Ok(url.to_string());
        }
        let discovery_url = issuer_cfg.discovery_url.clone().unwrap_or_else(|| {
            format!(
                "{}/.well-known/openid-configuration",
                issuer.trim_end_matches('/')
            )
        });

        if let Some(entry) = self.discovery_cache.get(&discovery_url)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.jwks_url.clone());
        }

        let doc: DiscoveryDocument = self
            .client
            .get(&discovery_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.discovery_cache.insert(
            discovery_url,
            CachedDiscovery {
                jwks_url: doc.jwks_uri.clone(),
                expires_at: Instant::now() + self.discovery_ttl,
            },
        );
        Ok(doc.jwks_uri)
    }

    async fn get_jwks(&self, jwks_url: &str) -> Result<JwkSet, OidcError> {
        if let Some(entry) = self.jwks_cache.get(jwks_url)
            && entry.expires_at > Instant::now()
        {
            return Ok(entry.jwks.clone());
        }
        self.refresh_jwks(jwks_url).await
    }

    async fn refresh_jwks(&self, jwks_url: &str) -> Result<JwkSet, OidcError> {
        let jwks: JwkSet = self
            .client
            .get(jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.jwks_cache.insert(
            jwks_url.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                expires_at: Instant::now() + self.jwks_ttl,
            },
        );
        Ok(jwks)
    }
}

#[async_trait]
impl TokenVerifier for OidcVerifier {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity, OidcError> {
        self.verify_token(bearer).await
    }
}

fn is_algorithm_allowed(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::ES256)
        || (cfg!(feature = "oidc-rsa") && matches!(alg, Algorithm::RS256))
}

fn ensure_jwk_matches_algorithm(
    jwk: &jsonwebtoken::jwk::Jwk,
    alg: Algorithm,
) -> Result<(), OidcError> {
    let key_alg = jwk
        .common
        .key_algorithm
        .ok_or_else(|| OidcError::InvalidJwk("missing alg".to_string()))?;
    match (key_alg, alg) {
        (KeyAlgorithm::RS256, Algorithm::RS256) | (KeyAlgorithm::ES256, Algorithm::ES256) => {}
        _ => return Err(OidcError::InvalidJwk("alg mismatch".to_string())),
    }
    match (&jwk.algorithm, alg) {
        (AlgorithmParameters::RSA(_), Algorithm::RS256) => Ok(()),
        (AlgorithmParameters::EllipticCurve(params), Algorithm::ES256)
            if params.curve == EllipticCurve::P256 =>
        {
            Ok(())
        }
        (AlgorithmParameters::EllipticCurve(_), Algorithm::ES256) => {
            Err(OidcError::InvalidJwk("unexpected EC curve".to_string()))
        }
        _ => Err(OidcError::InvalidJwk("kty mismatch".to_string())),
    }
}

fn find_jwk<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a jsonwebtoken::jwk::Jwk> {
    jwks.keys
        .iter()
        .find(|key| key.common.key_id.as_deref() == Some(kid))
}

fn decode_unverified_claims(token: &str) -> Result<Value, OidcError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| OidcError::InvalidClaim("token format".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| OidcError::InvalidClaim("token payload".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| OidcError::InvalidClaim(format!("token payload: {err}")))
}

fn extract_string_claim(claims: &Value, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn validate_iat(claims: &Value, leeway_seconds: u64) -> Result<(), OidcError> {
    let iat = claims
        .get("iat")
        .and_then(|value| value.as_i64())
        .ok_or_else(|| OidcError::InvalidClaim("iat".to_string()))?;
    if iat > Utc::now().timestamp() + leeway_seconds as i64 {
        return Err(OidcError::InvalidClaim("iat in future".to_string()));
    }
    Ok(())
}

// Groups arrive either as a single string or as an array of strings.
fn extract_groups_claim(claims: &Value, name: Option<&str>) -> Vec<String> {
    let Some(value) = name.and_then(|name| claims.get(name)) else {
        return Vec::new();
    };
    match value {
        Value::Array(values) => values
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::String(value) => vec![value.clone()],
        _ => Vec::new(),
    }
}
