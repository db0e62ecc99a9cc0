//! Audit finalizer for the pipeline.
//!
//! The guard is created before the first stage and holds a pending entry
//! with outcome `cancelled`. `finish` records the real outcome; if the
//! request future is dropped first, `Drop` records the pending entry.
use super::RequestContext;
use crate::audit::{AuditEntry, AuditRecorder, Outcome};
use chrono::Utc;

pub(crate) struct AuditGuard {
    recorder: Option<AuditRecorder>,
    pending: Option<AuditEntry>,
    anonymous_subject: String,
}

impl AuditGuard {
    pub(crate) fn new(
        recorder: Option<AuditRecorder>,
        ctx: &RequestContext,
        anonymous_subject: &str,
    ) -> Self {
        let mut guard = Self {
            pending: recorder.as_ref().map(|_| AuditEntry {
                subject: anonymous_subject.to_string(),
                domain: None,
                object: ctx.path.clone(),
                action: ctx.method.as_str().to_string(),
                outcome: Outcome::Cancelled,
                timestamp: Utc::now(),
            }),
            recorder,
            anonymous_subject: anonymous_subject.to_string(),
        };
        guard.observe(ctx);
        guard
    }

    pub(crate) fn observe(&mut self, ctx: &RequestContext) {
        let Some(entry) = self.pending.as_mut() else {
            return;
        };
        entry.subject = ctx
            .subject
            .as_ref()
            .map(|subject| subject.id.clone())
            .unwrap_or_else(|| self.anonymous_subject.clone());
        entry.domain = ctx.domain.clone();
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        if let Some(entry) = self.pending.as_mut() {
            entry.outcome = outcome;
        }
        self.flush();
    }

    pub(crate) fn disarm(&mut self) {
        self.pending = None;
    }

    fn flush(&mut self) {
        if let (Some(recorder), Some(entry)) = (&self.recorder, self.pending.take()) {
            recorder.record(entry);
        }
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        self.flush();
    }
}
