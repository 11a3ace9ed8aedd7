//! Audit trail for control-plane actions.
//!
//! Every operator action (pause, resume, clear, cancel, config change, memory
//! control) is recorded through an [`AuditSink`], successful or not.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// One control-plane action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Entry identifier.
    pub event_id: String,
    /// Action name, e.g. `pause` or `update_config`.
    pub action: String,
    /// Queue the action targeted.
    pub queue: Option<String>,
    /// Job the action targeted.
    pub job_id: Option<String>,
    /// Operator identity forwarded by the auth layer.
    pub actor: Option<String>,
    /// Whether the action was applied.
    pub success: bool,
    /// Result or error message.
    pub detail: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
}

impl AuditEntry {
    /// Entry stamped with a fresh id and the current time.
    pub fn new(action: impl Into<String>, success: bool, detail: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            queue: None,
            job_id: None,
            actor: None,
            success,
            detail: detail.into(),
            created_at_ms: now_ms(),
        }
    }

    /// Attach the targeted queue.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Attach the targeted job.
    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Attach the operator identity.
    #[must_use]
    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }
}

/// Persistence write for audit entries.
pub trait AuditSink: Send + Sync {
    /// Record an entry. Must not block for long; failures are the sink's
    /// concern.
    fn record(&self, entry: AuditEntry);
}

/// Bounded in-memory audit sink.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl InMemoryAuditSink {
    /// Sink keeping the latest `max_entries` entries.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(1024))),
            max_entries: max_entries.max(1),
        }
    }

    /// Snapshot of stored entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}
