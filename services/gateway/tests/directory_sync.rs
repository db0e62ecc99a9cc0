mod common;

use async_trait::async_trait;
use gateway::directory::{
    DirectoryRecord, DirectorySource, DirectorySynchronizer, FetchError, HttpDirectorySource,
};
use gateway::store::memory::InMemoryUserStore;
use gateway::store::{StoreResult, UserRecord, UserStore, update_user};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedSource {
    id: String,
    records: Mutex<Result<Vec<DirectoryRecord>, u16>>,
}

impl ScriptedSource {
    fn new(id: &str, records: Vec<DirectoryRecord>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            records: Mutex::new(Ok(records)),
        })
    }

    fn failing(id: &str, status: u16) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            records: Mutex::new(Err(status)),
        })
    }

    fn set(&self, records: Vec<DirectoryRecord>) {
        *self.records.lock().expect("records") = Ok(records);
    }
}

#[async_trait]
impl DirectorySource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<DirectoryRecord>, FetchError> {
        self.records
            .lock()
            .expect("records")
            .clone()
            .map_err(FetchError::Status)
    }
}

fn person(id: &str, email: &str) -> DirectoryRecord {
    DirectoryRecord {
        external_id: id.to_string(),
        display_name: id.to_uppercase(),
        email: Some(email.to_string()),
        groups: vec!["staff".to_string()],
        attributes: Default::default(),
    }
}

fn three_people() -> Vec<DirectoryRecord> {
    vec![
        person("a", "a@example.com"),
        person("b", "b@example.com"),
        person("c", "c@example.com"),
    ]
}

async fn versions(store: &dyn UserStore, source: &str) -> Vec<(String, u64)> {
    store
        .list_users_by_source(source)
        .await
        .expect("list")
        .into_iter()
        .map(|user| (user.external_id, user.version))
        .collect()
}

#[tokio::test]
async fn second_cycle_without_changes_writes_nothing() {
    let store = Arc::new(InMemoryUserStore::new());
    let source = ScriptedSource::new("ldap", three_people());
    let sync = DirectorySynchronizer::new(store.clone(), Duration::from_secs(60))
        .with_source(source, None, true);

    let first = sync.run_cycle().await;
    assert_eq!(first[0].created, 3);
    let before = versions(store.as_ref(), "ldap").await;

    let second = sync.run_cycle().await;
    assert_eq!(second[0].created, 0);
    assert_eq!(second[0].updated, 0);
    assert_eq!(second[0].deactivated, 0);
    assert_eq!(second[0].unchanged, 3);
    assert!(second[0].is_success());
    assert_eq!(versions(store.as_ref(), "ldap").await, before);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_others() {
    let store = Arc::new(InMemoryUserStore::new());
    let hr_user = UserRecord::new("hr", "zed", person("zed", "z@example.com").fields());
    store.put_user(hr_user, None).await.expect("seed");

    let sync = DirectorySynchronizer::new(store.clone(), Duration::from_secs(60))
        .with_source(ScriptedSource::failing("hr", 503), None, true)
        .with_source(ScriptedSource::new("ldap", three_people()), None, true);

    let reports = sync.run_cycle().await;
    let hr = reports.iter().find(|r| r.source_id == "hr").expect("hr");
    let ldap = reports.iter().find(|r| r.source_id == "ldap").expect("ldap");
    assert!(hr.error.as_deref().is_some_and(|e| e.contains("503")));
    assert_eq!(hr.deactivated, 0);
    assert_eq!(ldap.created, 3);
    assert!(ldap.is_success());

    // The failed source's records are left exactly as they were.
    let zed = store.get_user("hr/zed").await.expect("get").expect("zed");
    assert!(zed.active);
    assert_eq!(zed.version, 1);
    assert_eq!(sync.last_reports().len(), 2);
}

#[tokio::test]
async fn email_change_updates_only_that_record() {
    let store = Arc::new(InMemoryUserStore::new());
    let source = ScriptedSource::new("ldap", three_people());
    let sync = DirectorySynchronizer::new(store.clone(), Duration::from_secs(60))
        .with_source(source.clone(), None, true);
    sync.run_cycle().await;

    update_user(store.as_ref(), "ldap/b", 3, |user| {
        user.local
            .preferences
            .insert("theme".to_string(), "dark".to_string());
    })
    .await
    .expect("local write");

    let mut changed = three_people();
    changed[1].email = Some("b@new.example.com".to_string());
    source.set(changed);
    let report = sync.sync_source("ldap").await.expect("report");
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.created, 0);

    let b = store.get_user("ldap/b").await.expect("get").expect("b");
    assert_eq!(b.directory.email.as_deref(), Some("b@new.example.com"));
    assert_eq!(b.local.preferences.get("theme").map(String::as_str), Some("dark"));
    assert_eq!(b.version, 3);
    for id in ["ldap/a", "ldap/c"] {
        let user = store.get_user(id).await.expect("get").expect("user");
        assert_eq!(user.version, 1, "{id} must not be rewritten");
    }
}

/// Lets a request-path writer slip in between the synchronizer's read and
/// its compare-and-set, once.
struct InterferingStore {
    inner: InMemoryUserStore,
    armed: AtomicBool,
    conflicts: AtomicUsize,
}

#[async_trait]
impl UserStore for InterferingStore {
    async fn get_user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
        self.inner.get_user(id).await
    }

    async fn put_user(
        &self,
        record: UserRecord,
        expected_version: Option<u64>,
    ) -> StoreResult<UserRecord> {
        if expected_version.is_some() && self.armed.swap(false, Ordering::SeqCst) {
            update_user(&self.inner, &record.id, 1, |user| {
                user.local
                    .preferences
                    .insert("lang".to_string(), "fr".to_string());
            })
            .await?;
        }
        let result = self.inner.put_user(record, expected_version).await;
        if matches!(result, Err(gateway::store::StoreError::Conflict(_))) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn list_users_by_source(&self, source_id: &str) -> StoreResult<Vec<UserRecord>> {
        self.inner.list_users_by_source(source_id).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "interfering"
    }
}

#[tokio::test]
async fn conflicting_write_is_retried_and_both_changes_survive() {
    let store = Arc::new(InterferingStore {
        inner: InMemoryUserStore::new(),
        armed: AtomicBool::new(false),
        conflicts: AtomicUsize::new(0),
    });
    let source = ScriptedSource::new("ldap", three_people());
    let sync = DirectorySynchronizer::new(store.clone(), Duration::from_secs(60))
        .with_source(source.clone(), None, true);
    sync.run_cycle().await;

    let mut changed = three_people();
    changed[0].email = Some("a@new.example.com".to_string());
    source.set(changed);
    store.armed.store(true, Ordering::SeqCst);

    let report = sync.sync_source("ldap").await.expect("report");
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(store.conflicts.load(Ordering::SeqCst), 1);

    let a = store.get_user("ldap/a").await.expect("get").expect("a");
    assert_eq!(a.directory.email.as_deref(), Some("a@new.example.com"));
    assert_eq!(a.local.preferences.get("lang").map(String::as_str), Some("fr"));
}

#[tokio::test]
async fn exhausted_retries_count_as_failed_without_aborting() {
    struct AlwaysConflicting(InMemoryUserStore);

    #[async_trait]
    impl UserStore for AlwaysConflicting {
        async fn get_user(&self, id: &str) -> StoreResult<Option<UserRecord>> {
            self.0.get_user(id).await
        }

        async fn put_user(
            &self,
            record: UserRecord,
            expected_version: Option<u64>,
        ) -> StoreResult<UserRecord> {
            if expected_version.is_some() && record.external_id == "a" {
                return Err(gateway::store::StoreError::Conflict("busy".to_string()));
            }
            self.0.put_user(record, expected_version).await
        }

        async fn list_users_by_source(&self, source_id: &str) -> StoreResult<Vec<UserRecord>> {
            self.0.list_users_by_source(source_id).await
        }

        async fn health_check(&self) -> StoreResult<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "always-conflicting"
        }
    }

    let store = Arc::new(AlwaysConflicting(InMemoryUserStore::new()));
    let source = ScriptedSource::new("ldap", three_people());
    let sync = DirectorySynchronizer::new(store.clone(), Duration::from_secs(60))
        .with_source(source.clone(), None, true);
    sync.run_cycle().await;

    let changed: Vec<DirectoryRecord> = three_people()
        .into_iter()
        .map(|mut record| {
            record.email = Some(format!("{}@new.example.com", record.external_id));
            record
        })
        .collect();
    source.set(changed);
    let report = sync.sync_source("ldap").await.expect("report");
    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 2);
    assert!(report.error.is_none());
    assert!(!report.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_source_is_synced_by_the_background_task() {
    let records = serde_json::to_value(three_people()).expect("json");
    let app = axum::Router::new().route(
        "/users",
        axum::routing::get(move || {
            let records = records.clone();
            async move { axum::Json(records) }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });

    let store = Arc::new(InMemoryUserStore::new());
    let source = HttpDirectorySource::new(
        "ldap",
        format!("http://{addr}/users"),
        Duration::from_secs(2),
    )
    .expect("source");
    let sync = Arc::new(
        DirectorySynchronizer::new(store.clone(), Duration::from_secs(3600))
            .with_source(Arc::new(source), None, true),
    );
    let handle = sync.clone().spawn();

    let synced = common::eventually(|| {
        let store = store.clone();
        async move { store.len() == 3 }
    })
    .await;
    assert!(synced, "initial cycle should run at startup");
    handle.trigger("ldap").expect("trigger");
    handle.shutdown().await;

    let report = sync.last_report("ldap").expect("report");
    assert!(report.is_success());
    assert_eq!(report.created + report.unchanged, 3);
    server.abort();
}
