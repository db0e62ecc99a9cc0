//! Background directory synchronizer.
//!
//! # Purpose
//! Runs sync cycles per source on a timer or on demand, applies each
//! source's diff with per-record compare-and-set, and reports the outcome.
//!
//! # Concurrency model
//! - One supervisor task schedules cycles; each cycle runs on its own task so
//!   slow sources do not delay others.
//! - A per-source async mutex serializes cycles of the same source; cycles of
//!   different sources run concurrently.
//! - Every write is a single-record compare-and-set; conflicts are retried
//!   by re-reading the record and re-merging only directory-owned fields.
//!
//! # Cancellation
//! Dropping a cycle future mid-flight leaves every record either fully
//! applied or untouched. [`SyncHandle::shutdown`] stops scheduling, lets
//! running cycles finish, and then returns.
use super::diff::plan;
use super::{DirectoryRecord, DirectorySource};
use crate::store::{StoreError, UserRecord, UserStore, update_user};
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Pending on-demand triggers; further triggers are refused until the
/// supervisor catches up.
pub const TRIGGER_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub source_id: String,
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl CycleReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

struct SourceEntry {
    source: Arc<dyn DirectorySource>,
    interval: Duration,
    enabled: bool,
    running: Arc<Mutex<()>>,
}

pub struct DirectorySynchronizer {
    store: Arc<dyn UserStore>,
    sources: Vec<SourceEntry>,
    default_interval: Duration,
    max_attempts: usize,
    last_reports: DashMap<String, CycleReport>,
}

impl DirectorySynchronizer {
    pub fn new(store: Arc<dyn UserStore>, default_interval: Duration) -> Self {
        Self {
            store,
            sources: Vec::new(),
            default_interval,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_reports: DashMap::new(),
        }
    }

    /// Register a source. `interval` overrides the default cycle interval.
    pub fn with_source(
        mut self,
        source: Arc<dyn DirectorySource>,
        interval: Option<Duration>,
        enabled: bool,
    ) -> Self {
        self.sources.push(SourceEntry {
            interval: interval.unwrap_or(self.default_interval),
            enabled,
            running: Arc::new(Mutex::new(())),
            source,
        });
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|entry| entry.source.id().to_string())
            .collect()
    }

    pub fn last_report(&self, source_id: &str) -> Option<CycleReport> {
        self.last_reports
            .get(source_id)
            .map(|entry| entry.value().clone())
    }

    pub fn last_reports(&self) -> Vec<CycleReport> {
        let mut reports: Vec<CycleReport> = self
            .last_reports
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        reports.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        reports
    }

    /// Run one cycle of every enabled source concurrently.
    pub async fn run_cycle(&self) -> Vec<CycleReport> {
        let cycles = self
            .sources
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| self.run_entry(entry));
        futures::future::join_all(cycles).await
    }

    /// Run one cycle of a single source; `None` if the source is unknown.
    /// Disabled sources still run when asked for explicitly.
    pub async fn sync_source(&self, source_id: &str) -> Option<CycleReport> {
        let entry = self
            .sources
            .iter()
            .find(|entry| entry.source.id() == source_id)?;
        Some(self.run_entry(entry).await)
    }

    async fn run_entry(&self, entry: &SourceEntry) -> CycleReport {
        let _running = entry.running.lock().await;
        let source_id = entry.source.id();
        let span = tracing::info_span!("directory.sync", source_id = %source_id);
        let report = self
            .sync_once(entry.source.as_ref())
            .instrument(span)
            .await;
        record_metrics(&report);
        match &report.error {
            Some(error) => tracing::warn!(
                source_id = %report.source_id,
                %error,
                "directory sync cycle aborted"
            ),
            None => tracing::info!(
                source_id = %report.source_id,
                created = report.created,
                updated = report.updated,
                deactivated = report.deactivated,
                unchanged = report.unchanged,
                failed = report.failed,
                "directory sync cycle complete"
            ),
        }
        self.last_reports
            .insert(report.source_id.clone(), report.clone());
        report
    }

    async fn sync_once(&self, source: &dyn DirectorySource) -> CycleReport {
        let source_id = source.id();
        let mut report = CycleReport::new(source_id);

        let fetched = match source.fetch().await {
            Ok(records) => records,
            Err(err) => {
                metrics::counter!("tollgate_sync_fetch_errors_total", "source" => source_id.to_string())
                    .increment(1);
                report.error = Some(err.to_string());
                return report;
            }
        };
        let existing = match self.store.list_users_by_source(source_id).await {
            Ok(users) => users,
            Err(err) => {
                report.error = Some(format!("list users: {err}"));
                return report;
            }
        };
        let plan = match plan(source_id, fetched, &existing) {
            Ok(plan) => plan,
            Err(err) => {
                metrics::counter!("tollgate_sync_fetch_errors_total", "source" => source_id.to_string())
                    .increment(1);
                report.error = Some(err.to_string());
                return report;
            }
        };
        report.unchanged = plan.unchanged;

        for record in plan.create {
            match self.create(source_id, record).await {
                Ok(Applied::Created) => report.created += 1,
                Ok(Applied::Updated) => report.updated += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(source_id, error = %err, "directory record create failed");
                }
            }
        }
        for record in plan.update {
            let user_id = UserRecord::user_id(source_id, &record.external_id);
            match self.merge(&user_id, &record).await {
                Ok(_) => report.updated += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(source_id, %user_id, error = %err, "directory record update failed");
                }
            }
        }
        for user_id in plan.deactivate {
            let result = update_user(self.store.as_ref(), &user_id, self.max_attempts, |user| {
                user.active = false;
                user.synced_at = Some(Utc::now());
            })
            .await;
            match result {
                Ok(_) => report.deactivated += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(source_id, %user_id, error = %err, "directory record deactivate failed");
                }
            }
        }
        report
    }

    async fn create(&self, source_id: &str, record: DirectoryRecord) -> Result<Applied, StoreError> {
        let mut user = UserRecord::new(source_id, &record.external_id, record.fields());
        user.synced_at = Some(Utc::now());
        match self.store.put_user(user, None).await {
            Ok(_) => Ok(Applied::Created),
            // Created concurrently since the diff; fall back to a merge, but
            // only into a record this source owns.
            Err(StoreError::Conflict(reason)) => {
                let user_id = UserRecord::user_id(source_id, &record.external_id);
                match self.store.get_user(&user_id).await? {
                    Some(existing)
                        if existing.source_id != source_id
                            || existing.external_id != record.external_id =>
                    {
                        Err(StoreError::Conflict(format!(
                            "{user_id} is owned by source {}",
                            existing.source_id
                        )))
                    }
                    Some(_) => self.merge(&user_id, &record).await.map(|_| Applied::Updated),
                    None => Err(StoreError::Conflict(reason)),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn merge(&self, user_id: &str, record: &DirectoryRecord) -> Result<UserRecord, StoreError> {
        let fields = record.fields();
        update_user(self.store.as_ref(), user_id, self.max_attempts, |user| {
            user.directory = fields.clone();
            user.active = true;
            user.synced_at = Some(Utc::now());
        })
        .await
    }

    /// Start the supervisor task.
    pub fn spawn(self: Arc<Self>) -> SyncHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(supervise(self, trigger_rx, shutdown_rx));
        SyncHandle {
            trigger_tx,
            shutdown_tx,
            join,
        }
    }
}

enum Applied {
    Created,
    Updated,
}

fn record_metrics(report: &CycleReport) {
    let source = report.source_id.clone();
    for (op, count) in [
        ("created", report.created),
        ("updated", report.updated),
        ("deactivated", report.deactivated),
        ("unchanged", report.unchanged),
        ("failed", report.failed),
    ] {
        if count > 0 {
            metrics::counter!("tollgate_sync_records_total", "source" => source.clone(), "op" => op)
                .increment(count as u64);
        }
    }
}

#[derive(Debug)]
enum SyncTrigger {
    Source(String),
    All,
}

async fn supervise(
    sync: Arc<DirectorySynchronizer>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = Instant::now();
    let mut next_due: HashMap<String, Instant> = sync
        .sources
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| (entry.source.id().to_string(), start))
        .collect();
    let intervals: HashMap<String, Duration> = sync
        .sources
        .iter()
        .map(|entry| (entry.source.id().to_string(), entry.interval))
        .collect();
    let mut cycles: JoinSet<()> = JoinSet::new();

    let spawn_cycle = |cycles: &mut JoinSet<()>, source_id: String| {
        let sync = sync.clone();
        cycles.spawn(async move {
            let _ = sync.sync_source(&source_id).await;
        });
    };

    tracing::info!(sources = next_due.len(), "directory synchronizer started");
    loop {
        let wake_at = next_due
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            trigger = triggers.recv() => match trigger {
                Some(SyncTrigger::Source(source_id)) => {
                    if intervals.contains_key(&source_id) {
                        spawn_cycle(&mut cycles, source_id);
                    } else {
                        tracing::warn!(%source_id, "sync trigger for unknown source ignored");
                    }
                }
                Some(SyncTrigger::All) => {
                    for source_id in next_due.keys() {
                        spawn_cycle(&mut cycles, source_id.clone());
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(wake_at) => {
                let now = Instant::now();
                for (source_id, due) in next_due.iter_mut() {
                    if *due > now {
                        continue;
                    }
                    let interval = intervals.get(source_id).copied().unwrap_or(sync.default_interval);
                    *due = now + interval;
                    // A cycle still holding the source lock means the timer
                    // fired faster than the source completes; skip this tick.
                    let busy = sync
                        .sources
                        .iter()
                        .find(|entry| entry.source.id() == source_id)
                        .is_some_and(|entry| entry.running.try_lock().is_err());
                    if busy {
                        tracing::debug!(%source_id, "previous sync cycle still running; tick skipped");
                        continue;
                    }
                    spawn_cycle(&mut cycles, source_id.clone());
                }
            }
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "directory sync cycle task failed");
                }
            }
        }
    }

    while let Some(joined) = cycles.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "directory sync cycle task failed");
        }
    }
    tracing::info!("directory synchronizer stopped");
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("directory synchronizer is not running")]
    Stopped,
    #[error("sync trigger queue is full")]
    Full,
}

fn trigger_error(err: mpsc::error::TrySendError<SyncTrigger>) -> TriggerError {
    match err {
        mpsc::error::TrySendError::Full(_) => TriggerError::Full,
        mpsc::error::TrySendError::Closed(_) => TriggerError::Stopped,
    }
}

/// Control handle for the running synchronizer.
#[derive(Debug)]
pub struct SyncHandle {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    pub fn trigger(&self, source_id: &str) -> Result<(), TriggerError> {
        self.trigger_tx
            .try_send(SyncTrigger::Source(source_id.to_string()))
            .map_err(trigger_error)
    }

    pub fn trigger_all(&self) -> Result<(), TriggerError> {
        self.trigger_tx
            .try_send(SyncTrigger::All)
            .map_err(trigger_error)
    }

    /// Stop scheduling, wait for running cycles, and join the supervisor.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "directory synchronizer task failed");
        }
    }
}
