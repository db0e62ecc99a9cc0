//! The acting subject of a request.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub domain: Option<String>,
    pub roles: Vec<String>,
    /// Local user record backing this subject, if any.
    #[serde(default)]
    pub user_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subject {
    pub fn new(id: impl Into<String>, domain: Option<String>, roles: Vec<String>) -> Self {
        Self {
            id: id.into(),
            domain,
            roles,
            user_id: None,
            issued_at: None,
            expires_at: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// The unauthenticated subject: no roles, no domain, no validity window.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self::new(id, None, Vec::new())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Session roles only count inside the domain the subject signed in to.
    pub fn roles_for(&self, domain: &str) -> &[String] {
        match &self.domain {
            Some(own) if own == domain => self.roles.as_slice(),
            _ => &[],
        }
    }
}
