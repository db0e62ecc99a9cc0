//! Session issuance and validation.
//!
//! # Purpose
//! Maps opaque session tokens to the [`Subject`] they were issued for.
//!
//! # Key invariants
//! - Tokens are 32 random bytes, URL-safe base64 without padding.
//! - An expired token validates as absent and is evicted on first sight.
//!   Tokens never presented again are dropped by the [`SessionSweeper`].
//! - The store is keyed per token; no operation locks the whole store.
use crate::auth::subject::Subject;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default cookie lifetime: thirty days.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub subject: Subject,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, subject: Subject) -> Session;
    async fn validate_session(&self, token: &str) -> Option<Subject>;
    async fn expire(&self, token: &str);
    /// Drop every expired session; returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Subject>>,
    ttl: Duration,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_SESSION_TTL_SECS))
    }
}

impl InMemorySessionStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(30)),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, subject| !subject.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }

    /// Issue a session with an explicit validity window.
    pub fn insert_with_window(
        &self,
        mut subject: Subject,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Session {
        subject.issued_at = Some(issued_at);
        subject.expires_at = Some(expires_at);
        let token = new_token();
        self.sessions.insert(token.clone(), subject.clone());
        Session { token, subject }
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, subject: Subject) -> Session {
        let now = Utc::now();
        let session = self.insert_with_window(subject, now, now + self.ttl);
        tracing::debug!(subject = %session.subject.id, "session created");
        session
    }

    async fn validate_session(&self, token: &str) -> Option<Subject> {
        let subject = self.sessions.get(token).map(|entry| entry.value().clone())?;
        if subject.is_expired_at(Utc::now()) {
            self.sessions.remove(token);
            return None;
        }
        Some(subject)
    }

    async fn expire(&self, token: &str) {
        self.sessions.remove(token);
    }

    async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }
}

/// Periodically purges expired sessions until shut down.
#[derive(Debug)]
pub struct SessionSweeper {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SessionSweeper {
    pub fn spawn(sessions: Arc<dyn SessionStore>, every: std::time::Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let purged = sessions.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "expired sessions purged");
                        }
                    }
                }
            }
        });
        Self { shutdown_tx, join }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "session sweeper task failed");
        }
    }
}
