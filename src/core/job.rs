//! Job records and the legal state-transition graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::serde::{JobId, Priority, TenantId};

/// Opaque work descriptor handed to the unit of work.
pub type JobPayload = serde_json::Value;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted and waiting for a worker slot.
    Waiting,
    /// Holding a worker slot.
    Active,
    /// Preempted; returns to `Waiting` when a slot frees.
    Paused,
    /// Finished successfully.
    Completed,
    /// Exhausted retries or failed terminally.
    Failed,
    /// Cancelled by an operator or by the unit of work.
    Cancelled,
}

impl JobState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the legal graph.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Active | Self::Paused | Self::Cancelled)
                | (
                    Self::Active,
                    Self::Completed | Self::Failed | Self::Paused | Self::Cancelled
                )
                | (Self::Paused, Self::Waiting | Self::Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of crawl or analysis work owned by a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Owning queue.
    pub queue: String,
    /// Submitting tenant.
    pub tenant: TenantId,
    /// Tier derived from the tenant's plan.
    pub priority: Priority,
    /// Work descriptor.
    pub payload: JobPayload,
    /// Current state.
    pub state: JobState,
    /// Admission time, epoch milliseconds.
    pub enqueued_at_ms: u64,
    /// Most recent dispatch time, epoch milliseconds.
    pub started_at_ms: Option<u64>,
    /// Terminal transition time, epoch milliseconds.
    pub finished_at_ms: Option<u64>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Error recorded by the last failed attempt.
    pub last_error: Option<String>,
    /// Tenant counter charged for this job, released on a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_counter: Option<String>,
}

impl Job {
    /// Create a waiting job.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        tenant: impl Into<TenantId>,
        priority: Priority,
        payload: JobPayload,
        now_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.into(),
            tenant: tenant.into(),
            priority,
            payload,
            state: JobState::Waiting,
            enqueued_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
            attempts: 0,
            last_error: None,
            usage_counter: None,
        }
    }

    /// Move to `next`, refusing edges outside the legal graph.
    pub fn transition(&mut self, next: JobState, now_ms: u64) -> Result<JobState, SchedulerError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(SchedulerError::IllegalTransition { from, to: next });
        }
        self.state = next;
        match next {
            JobState::Active => self.started_at_ms = Some(now_ms),
            s if s.is_terminal() => self.finished_at_ms = Some(now_ms),
            _ => {}
        }
        Ok(from)
    }

    /// Approximate in-memory footprint of the payload, in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        serde_json::to_vec(&self.payload).map_or(0, |v| v.len())
    }
}

/// A state change reported to [`JobObserver`]s.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    /// The job after the transition.
    pub job: Job,
    /// State before the transition.
    pub from: JobState,
    /// State after the transition.
    pub to: JobState,
}

/// Receives every job state transition.
///
/// Observers are invoked in transition order while the owning queue is
/// locked. They must not block or call back into the queue manager.
pub trait JobObserver: Send + Sync {
    /// Called once per transition.
    fn on_transition(&self, event: &TransitionEvent);
}
