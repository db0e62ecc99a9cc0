//! Storage contracts used by the request path and the directory synchronizer.
//!
//! # Purpose
//! Defines the local user record, the compare-and-set [`UserStore`] contract,
//! and the policy stores the engine reloads from.
//!
//! # Key invariants
//! - `put_user` is a per-record compare-and-set on `version`; a stale
//!   `expected_version` fails with [`StoreError::Conflict`] and writes nothing.
//! - Directory-owned fields and request-owned fields live in separate
//!   structs so each writer only re-merges what it owns on retry.
//! - Local ids are injective in `(source_id, external_id)`: the source part
//!   is escaped so the first `/` always ends it.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod memory;
pub mod policy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields copied from the external directory. Written only by the synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryFields {
    pub display_name: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

/// Fields owned by the gateway itself. The synchronizer never touches them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFields {
    pub preferences: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub source_id: String,
    pub external_id: String,
    pub directory: DirectoryFields,
    pub local: LocalFields,
    pub active: bool,
    pub version: u64,
    pub synced_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn user_id(source_id: &str, external_id: &str) -> String {
        let mut id = String::with_capacity(source_id.len() + external_id.len() + 1);
        for ch in source_id.chars() {
            match ch {
                '%' => id.push_str("%25"),
                '/' => id.push_str("%2F"),
                other => id.push(other),
            }
        }
        id.push('/');
        id.push_str(external_id);
        id
    }

    pub fn new(source_id: &str, external_id: &str, directory: DirectoryFields) -> Self {
        Self {
            id: Self::user_id(source_id, external_id),
            source_id: source_id.to_string(),
            external_id: external_id.to_string(),
            directory,
            local: LocalFields::default(),
            active: true,
            version: 0,
            synced_at: None,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &str) -> StoreResult<Option<UserRecord>>;

    /// Insert (`expected_version = None`) or replace a record whose stored
    /// version equals `expected_version`. Returns the record as stored, with
    /// its new version.
    async fn put_user(
        &self,
        record: UserRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<UserRecord>;

    async fn list_users_by_source(&self, source_id: &str) -> StoreResult<Vec<UserRecord>>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Read-modify-write with compare-and-set, retried on conflict.
///
/// `mutate` is re-applied to the freshly read record on every attempt, so it
/// must only touch the fields its caller owns.
pub async fn update_user<F>(
    store: &dyn UserStore,
    id: &str,
    max_attempts: usize,
    mut mutate: F,
) -> StoreResult<UserRecord>
where
    F: FnMut(&mut UserRecord) + Send,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let current = store
            .get_user(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let expected = current.version;
        let mut next = current;
        mutate(&mut next);
        match store.put_user(next, Some(expected)).await {
            Err(StoreError::Conflict(reason)) if attempt < max_attempts => {
                tracing::debug!(user_id = %id, attempt, %reason, "user update conflict; retrying");
            }
            other => return other,
        }
    }
}
