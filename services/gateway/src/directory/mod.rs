//! External directory synchronization.
//!
//! # Purpose
//! Keeps the local user store consistent with one or more external
//! directories (LDAP exports, HR feeds) without blocking request traffic.
//!
//! # How it fits
//! A [`DirectorySource`] fetches the full record set of one directory. The
//! [`sync::DirectorySynchronizer`] diffs that set against the records the
//! store holds for the source and applies the difference record by record.
//!
//! # Key invariants
//! - A fetch failure aborts only that source's cycle.
//! - Records are never deleted; records that leave the source are
//!   deactivated and reactivated if they come back.
//! - Only directory-owned fields are written; gateway-owned fields survive.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod diff;
pub mod http;
pub mod sync;

pub use http::HttpDirectorySource;
pub use sync::{CycleReport, DirectorySynchronizer, SyncHandle, TriggerError};

use crate::store::DirectoryFields;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub external_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl DirectoryRecord {
    /// Directory-owned fields as stored locally. Groups are a set, kept
    /// sorted and deduplicated.
    pub fn fields(&self) -> DirectoryFields {
        let mut groups = self.groups.clone();
        groups.sort();
        groups.dedup();
        DirectoryFields {
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            groups,
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory returned status {0}")]
    Status(u16),
    #[error("directory data invalid: {0}")]
    Invalid(String),
}

#[async_trait]
pub trait DirectorySource: Send + Sync {
    fn id(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<DirectoryRecord>, FetchError>;
}
