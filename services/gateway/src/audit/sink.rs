use super::{AuditEntry, AuditError, AuditSink};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Keeps entries in memory; used by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

/// Emits each entry as a structured `tollgate::audit` event; the default
/// when no audit log file is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "tollgate::audit",
            subject = %entry.subject,
            domain = entry.domain.as_deref().unwrap_or(""),
            object = %entry.object,
            action = %entry.action,
            outcome = entry.outcome.as_str(),
            timestamp = %entry.timestamp,
            "audit"
        );
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Outcome;
    use chrono::Utc;

    #[tokio::test]
    async fn json_lines_sink_appends_one_object_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit").join("audit.log");
        let sink = JsonLinesAuditSink::open(&path).await.expect("open");
        for (subject, outcome) in [("alice", Outcome::Allowed), ("bob", Outcome::Denied)] {
            sink.write(&AuditEntry {
                subject: subject.to_string(),
                domain: None,
                object: "/x".to_string(),
                action: "POST".to_string(),
                outcome,
                timestamp: Utc::now(),
            })
            .await
            .expect("write");
        }

        let contents = std::fs::read_to_string(sink.path()).expect("read");
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["subject"], "bob");
        assert_eq!(second["outcome"], "denied");
        assert!(second["domain"].is_null());
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.log");
        let entry = AuditEntry {
            subject: "alice".to_string(),
            domain: Some("org1".to_string()),
            object: "/x".to_string(),
            action: "GET".to_string(),
            outcome: Outcome::Allowed,
            timestamp: Utc::now(),
        };
        JsonLinesAuditSink::open(&path)
            .await
            .expect("open")
            .write(&entry)
            .await
            .expect("write");
        JsonLinesAuditSink::open(&path)
            .await
            .expect("reopen")
            .write(&entry)
            .await
            .expect("write");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().count(), 2);
    }
}
