use crate::audit::DEFAULT_QUEUE_CAPACITY;
use crate::auth::idp_registry::IdpIssuerConfig;
use crate::auth::session::DEFAULT_SESSION_TTL_SECS;
use crate::pipeline::PipelineConfig;
use crate::pipeline::auto_signin::SESSION_COOKIE;
use crate::pipeline::authorize::DEFAULT_TENANT_HEADER;
use crate::pipeline::static_bypass::DEFAULT_STATIC_PREFIXES;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

// Gateway configuration sourced from environment variables, then a YAML overlay.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub static_prefixes: Vec<String>,
    pub static_root: Option<PathBuf>,
    pub session_ttl_secs: u64,
    pub session_cookie: String,
    pub tenant_header: String,
    pub default_domain: Option<String>,
    pub policy_file: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub audit_queue_capacity: usize,
    pub sync: SyncConfig,
    pub issuers: Vec<IdpIssuerConfig>,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub sources: Vec<DirectorySourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectorySourceConfig {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    static_prefixes: Option<Vec<String>>,
    static_root: Option<PathBuf>,
    session_ttl_secs: Option<u64>,
    session_cookie: Option<String>,
    tenant_header: Option<String>,
    default_domain: Option<String>,
    policy_file: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    audit_queue_capacity: Option<usize>,
    sync: Option<SyncOverride>,
    issuers: Option<Vec<IdpIssuerConfig>>,
    pipeline: Option<PipelineConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncOverride {
    interval_secs: Option<u64>,
    sources: Option<Vec<DirectorySourceConfig>>,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        Some(value) => value.parse().with_context(|| format!("parse {key}")),
        None => Ok(default),
    }
}

fn split_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_string)
        .collect()
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = parse_env("TOLLGATE_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let metrics_bind =
            parse_env("TOLLGATE_METRICS_BIND", SocketAddr::from(([0, 0, 0, 0], 9090)))?;
        let static_prefixes = env_var("TOLLGATE_STATIC_PREFIXES")
            .map(|raw| split_prefixes(&raw))
            .unwrap_or_else(|| {
                DEFAULT_STATIC_PREFIXES
                    .iter()
                    .map(|prefix| prefix.to_string())
                    .collect()
            });
        let interval_secs = parse_env("TOLLGATE_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        let config = Self {
            bind_addr,
            metrics_bind,
            static_prefixes,
            static_root: env_var("TOLLGATE_STATIC_ROOT").map(PathBuf::from),
            session_ttl_secs: parse_env("TOLLGATE_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            session_cookie: SESSION_COOKIE.to_string(),
            tenant_header: DEFAULT_TENANT_HEADER.to_string(),
            default_domain: env_var("TOLLGATE_DEFAULT_DOMAIN"),
            policy_file: env_var("TOLLGATE_POLICY_FILE").map(PathBuf::from),
            audit_log: env_var("TOLLGATE_AUDIT_LOG").map(PathBuf::from),
            audit_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sync: SyncConfig {
                interval: Duration::from_secs(interval_secs),
                sources: Vec::new(),
            },
            issuers: Vec::new(),
            pipeline: PipelineConfig::default(),
        };
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = env_var("TOLLGATE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read TOLLGATE_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: GatewayConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse gateway config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.static_prefixes {
            self.static_prefixes = value;
        }
        if let Some(value) = override_cfg.static_root {
            self.static_root = Some(value);
        }
        if let Some(value) = override_cfg.session_ttl_secs {
            self.session_ttl_secs = value;
        }
        if let Some(value) = override_cfg.session_cookie {
            self.session_cookie = value;
        }
        if let Some(value) = override_cfg.tenant_header {
            self.tenant_header = value;
        }
        if let Some(value) = override_cfg.default_domain {
            self.default_domain = Some(value);
        }
        if let Some(value) = override_cfg.policy_file {
            self.policy_file = Some(value);
        }
        if let Some(value) = override_cfg.audit_log {
            self.audit_log = Some(value);
        }
        if let Some(value) = override_cfg.audit_queue_capacity {
            self.audit_queue_capacity = value;
        }
        if let Some(sync) = override_cfg.sync {
            if let Some(value) = sync.interval_secs {
                self.sync.interval = Duration::from_secs(value);
            }
            if let Some(value) = sync.sources {
                self.sync.sources = value;
            }
        }
        if let Some(value) = override_cfg.issuers {
            self.issuers = value;
        }
        if let Some(value) = override_cfg.pipeline {
            self.pipeline = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        anyhow::ensure!(self.session_ttl_secs > 0, "session_ttl_secs must be positive");
        anyhow::ensure!(
            self.audit_queue_capacity > 0,
            "audit_queue_capacity must be positive"
        );
        anyhow::ensure!(
            !self.sync.interval.is_zero(),
            "sync interval must be positive"
        );
        anyhow::ensure!(
            !self.session_cookie.trim().is_empty(),
            "session_cookie must not be empty"
        );
        anyhow::ensure!(
            axum::http::HeaderName::from_bytes(self.tenant_header.as_bytes()).is_ok(),
            "tenant_header is not a valid header name: {}",
            self.tenant_header
        );
        let mut ids = HashSet::new();
        for source in &self.sync.sources {
            anyhow::ensure!(!source.id.trim().is_empty(), "directory source id is empty");
            anyhow::ensure!(
                !source.id.contains('/'),
                "directory source id {} must not contain '/'",
                source.id
            );
            anyhow::ensure!(
                ids.insert(source.id.as_str()),
                "directory source {} configured twice",
                source.id
            );
            anyhow::ensure!(
                source.interval_secs != Some(0),
                "directory source {} has a zero interval",
                source.id
            );
        }
        Ok(())
    }
}
