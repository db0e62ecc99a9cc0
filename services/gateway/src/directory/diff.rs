//! Classification of fetched records against the local store.
use super::{DirectoryRecord, FetchError};
use crate::store::UserRecord;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub create: Vec<DirectoryRecord>,
    pub update: Vec<DirectoryRecord>,
    /// Local user ids whose records left the source.
    pub deactivate: Vec<String>,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.deactivate.is_empty()
    }
}

/// Diff one source's fetched records against its stored users.
///
/// A stored record is changed when its directory fields differ or when it is
/// inactive but present in the source again. Inactive records that are still
/// absent count as unchanged.
pub fn plan(
    source_id: &str,
    fetched: Vec<DirectoryRecord>,
    existing: &[UserRecord],
) -> Result<SyncPlan, FetchError> {
    let mut seen = HashSet::with_capacity(fetched.len());
    for record in &fetched {
        if record.external_id.trim().is_empty() {
            return Err(FetchError::Invalid("record with empty external_id".to_string()));
        }
        if !seen.insert(record.external_id.as_str()) {
            return Err(FetchError::Invalid(format!(
                "duplicate external_id {}",
                record.external_id
            )));
        }
    }

    let by_id: HashMap<&str, &UserRecord> = existing
        .iter()
        .filter(|user| user.source_id == source_id)
        .map(|user| (user.external_id.as_str(), user))
        .collect();

    let mut plan = SyncPlan::default();
    for user in by_id.values() {
        if seen.contains(user.external_id.as_str()) {
            continue;
        }
        if user.active {
            plan.deactivate.push(user.id.clone());
        } else {
            plan.unchanged += 1;
        }
    }
    plan.deactivate.sort();

    for record in fetched {
        match by_id.get(record.external_id.as_str()) {
            None => plan.create.push(record),
            Some(user) if !user.active || user.directory != record.fields() => {
                plan.update.push(record)
            }
            Some(_) => plan.unchanged += 1,
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DirectoryFields;

    fn record(id: &str, email: &str) -> DirectoryRecord {
        DirectoryRecord {
            external_id: id.to_string(),
            display_name: id.to_uppercase(),
            email: Some(email.to_string()),
            groups: vec!["staff".to_string()],
            attributes: Default::default(),
        }
    }

    fn stored(record: &DirectoryRecord, active: bool) -> UserRecord {
        let mut user = UserRecord::new("src", &record.external_id, record.fields());
        user.active = active;
        user.version = 1;
        user
    }

    #[test]
    fn classifies_new_changed_unchanged_and_stale() {
        let same = record("u1", "u1@example.com");
        let changed_before = record("u2", "old@example.com");
        let gone = record("u3", "u3@example.com");
        let existing = vec![
            stored(&same, true),
            stored(&changed_before, true),
            stored(&gone, true),
        ];
        let fetched = vec![
            same.clone(),
            record("u2", "new@example.com"),
            record("u4", "u4@example.com"),
        ];

        let plan = plan("src", fetched, &existing).expect("plan");
        assert_eq!(plan.create.len(), 1);
        assert_eq!(plan.create[0].external_id, "u4");
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].email.as_deref(), Some("new@example.com"));
        assert_eq!(plan.deactivate, vec!["src/u3".to_string()]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn returning_record_is_reactivated() {
        let back = record("u1", "u1@example.com");
        let plan = plan("src", vec![back.clone()], &[stored(&back, false)]).expect("plan");
        assert_eq!(plan.update, vec![back]);
    }

    #[test]
    fn reordered_groups_are_unchanged() {
        let mut before = record("u1", "u1@example.com");
        before.groups = vec!["eng".to_string(), "staff".to_string(), "ops".to_string()];
        let mut after = before.clone();
        after.groups = vec!["ops".to_string(), "staff".to_string(), "eng".to_string(), "ops".to_string()];

        let plan = plan("src", vec![after], &[stored(&before, true)]).expect("plan");
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
        assert_eq!(before.fields().groups, vec!["eng", "ops", "staff"]);
    }

    #[test]
    fn already_inactive_absent_record_is_unchanged() {
        let gone = record("u1", "u1@example.com");
        let plan = plan("src", Vec::new(), &[stored(&gone, false)]).expect("plan");
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn other_sources_are_ignored() {
        let mut foreign = UserRecord::new("other", "u1", DirectoryFields::default());
        foreign.active = true;
        let plan = plan("src", Vec::new(), &[foreign]).expect("plan");
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn duplicate_or_empty_ids_are_invalid() {
        let dup = record("u1", "a@example.com");
        assert!(matches!(
            plan("src", vec![dup.clone(), dup], &[]),
            Err(FetchError::Invalid(_))
        ));
        assert!(matches!(
            plan("src", vec![record(" ", "x@example.com")], &[]),
            Err(FetchError::Invalid(_))
        ));
    }
}
