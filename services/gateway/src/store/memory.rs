//! In-memory implementation of the user store.
//!
//! # Purpose
//! Backs local development, tests, and single-process deployments where the
//! user directory can be rebuilt by the synchronizer after a restart.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Per-record locking**: `DashMap` shards guard individual keys, so a
//!   compare-and-set on one user never blocks writers of another user and no
//!   operation takes a store-wide lock.
use super::{StoreError, StoreResult, UserRecord, UserStore};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<DashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.get(id).map(|entry| entry.value().clone()))
    }

    async fn put_user(
        &self,
        mut record: UserRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<UserRecord> {
        // The entry guard holds the shard lock for this key only.
        match (self.users.entry(record.id.clone()), expected_version) {
            (Entry::Vacant(slot), None) => {
                record.version = 1;
                slot.insert(record.clone());
                Ok(record)
            }
            (Entry::Vacant(_), Some(_)) => Err(StoreError::NotFound(record.id)),
            (Entry::Occupied(existing), None) => Err(StoreError::Conflict(format!(
                "{} already exists at version {}",
                existing.key(),
                existing.get().version
            ))),
            (Entry::Occupied(mut existing), Some(expected)) => {
                let stored = existing.get().version;
                if stored != expected {
                    return Err(StoreError::Conflict(format!(
                        "{} is at version {stored}, expected {expected}",
                        existing.key()
                    )));
                }
                record.version = stored + 1;
                existing.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn list_users_by_source(&self, source_id: &str) -> StoreResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|entry| entry.value().source_id == source_id)
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
