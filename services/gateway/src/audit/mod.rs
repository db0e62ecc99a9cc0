//! Request audit trail.
//!
//! # Purpose
//! Records who attempted what, where, and with which outcome for every
//! request that passes the static bypass.
//!
//! # How it fits
//! The pipeline's audit finalizer calls [`AuditRecorder::record`], which only
//! enqueues. A single [`AuditWriter`] task drains the queue into an
//! [`AuditSink`].
//!
//! # Key invariants
//! - Recording never blocks and never fails the request: a full or closed
//!   queue drops the entry, logs it, and bumps `tollgate_audit_dropped_total`.
//! - Sink failures are logged and counted (`tollgate_audit_write_errors_total`)
//!   and the writer keeps draining.
//! - Entries are write-once; there is no ordering guarantee across requests.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub mod sink;

pub use sink::{JsonLinesAuditSink, MemoryAuditSink, TracingAuditSink};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allowed,
    Denied,
    Error,
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Denied => "denied",
            Outcome::Error => "error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub subject: String,
    pub domain: Option<String>,
    pub object: String,
    pub action: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

#[derive(Debug, Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditRecorder {
    pub fn channel(capacity: usize, sink: Arc<dyn AuditSink>) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AuditWriter { rx, sink })
    }

    pub fn record(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                metrics::counter!("tollgate_audit_dropped_total", "reason" => "full").increment(1);
                tracing::warn!(
                    subject = %entry.subject,
                    object = %entry.object,
                    outcome = entry.outcome.as_str(),
                    "audit queue full; entry dropped"
                );
            }
            Err(TrySendError::Closed(entry)) => {
                metrics::counter!("tollgate_audit_dropped_total", "reason" => "closed")
                    .increment(1);
                tracing::warn!(
                    subject = %entry.subject,
                    object = %entry.object,
                    "audit writer stopped; entry dropped"
                );
            }
        }
    }
}

pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEntry>,
    sink: Arc<dyn AuditSink>,
}

impl AuditWriter {
    /// Drain until every recorder has been dropped.
    pub async fn run(mut self) {
        while let Some(entry) = self.rx.recv().await {
            if let Err(err) = self.sink.write(&entry).await {
                metrics::counter!("tollgate_audit_write_errors_total").increment(1);
                tracing::warn!(error = %err, subject = %entry.subject, "audit write failed");
            }
        }
        tracing::debug!("audit writer drained");
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(subject: &str, outcome: Outcome) -> AuditEntry {
        AuditEntry {
            subject: subject.to_string(),
            domain: Some("org1".to_string()),
            object: "/data/x".to_string(),
            action: "GET".to_string(),
            outcome,
            timestamp: Utc::now(),
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AuditSink for FailingSink {
        async fn write(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AuditError::Unavailable("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn writer_drains_into_sink() {
        let sink = MemoryAuditSink::new();
        let (recorder, writer) = AuditRecorder::channel(8, Arc::new(sink.clone()));
        let handle = writer.spawn();
        recorder.record(entry("alice", Outcome::Allowed));
        recorder.record(entry("bob", Outcome::Denied));
        drop(recorder);
        handle.await.expect("writer");

        let entries = sink.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].outcome, Outcome::Denied);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let sink = MemoryAuditSink::new();
        let (recorder, writer) = AuditRecorder::channel(1, Arc::new(sink.clone()));
        recorder.record(entry("alice", Outcome::Allowed));
        recorder.record(entry("bob", Outcome::Allowed));
        recorder.record(entry("carol", Outcome::Allowed));
        drop(recorder);
        writer.run().await;
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, "alice");
    }

    #[tokio::test]
    async fn closed_queue_is_swallowed() {
        let sink = MemoryAuditSink::new();
        let (recorder, writer) = AuditRecorder::channel(4, Arc::new(sink));
        drop(writer);
        recorder.record(entry("alice", Outcome::Error));
    }

    #[tokio::test]
    async fn sink_errors_do_not_stop_the_writer() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let (recorder, writer) = AuditRecorder::channel(4, sink.clone());
        recorder.record(entry("alice", Outcome::Allowed));
        recorder.record(entry("bob", Outcome::Cancelled));
        drop(recorder);
        writer.run().await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn outcome_serializes_lowercase() {
        let json = serde_json::to_string(&Outcome::Cancelled).expect("json");
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(Outcome::Denied.as_str(), "denied");
    }
}
