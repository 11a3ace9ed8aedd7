//! Error types for scheduler operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::job::JobState;

/// Why a queue refuses new admissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveCause {
    /// An operator paused the queue.
    Paused,
    /// The memory monitor is shedding load on this queue.
    MemoryPressure,
}

/// Machine-readable reason attached to an admission denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum AdmissionReason {
    /// The queue already holds `maxQueueSize` waiting jobs.
    #[serde(rename = "QueueFull")]
    QueueFull {
        /// Queue name.
        queue: String,
    },
    /// The queue is not accepting new jobs.
    #[serde(rename = "QueueInactive")]
    QueueInactive {
        /// Queue name.
        queue: String,
        /// Why admissions are closed.
        cause: InactiveCause,
    },
    /// The tenant's plan ceiling would be exceeded.
    #[serde(rename = "TenantLimitExceeded")]
    TenantLimitExceeded {
        /// Tenant identifier.
        tenant: String,
        /// Counter that would overflow.
        counter: String,
        /// Human-readable explanation.
        detail: String,
    },
    /// The caller exhausted its request budget.
    #[serde(rename = "RateLimited")]
    RateLimited {
        /// Epoch milliseconds at which admission resumes.
        #[serde(rename = "resetAtMs")]
        reset_at_ms: u64,
    },
}

impl std::fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull { queue } => write!(f, "queue full: {queue}"),
            Self::QueueInactive { queue, cause } => match cause {
                InactiveCause::Paused => write!(f, "queue inactive: {queue} is paused"),
                InactiveCause::MemoryPressure => {
                    write!(f, "queue inactive: {queue} is throttled by memory pressure")
                }
            },
            Self::TenantLimitExceeded { detail, .. } => write!(f, "tenant limit exceeded: {detail}"),
            Self::RateLimited { reset_at_ms } => {
                write!(f, "rate limit exceeded, retry after {reset_at_ms}")
            }
        }
    }
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Work was refused at admission time.
    #[error("admission denied: {0}")]
    AdmissionDenied(AdmissionReason),
    /// A unit of work failed in a way the retry policy may recover from.
    #[error("transient work failure: {0}")]
    TransientWorkFailure(String),
    /// A unit of work failed permanently or exhausted its retries.
    #[error("terminal work failure: {0}")]
    TerminalWorkFailure(String),
    /// Control-plane input named a queue that does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    /// Control-plane input named a job that does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A job state change outside the legal transition graph.
    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
    /// Collaborator (persistence, runtime) failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Whether the error stems from invalid operator input.
    #[must_use]
    pub const fn is_operator_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownQueue(_) | Self::UnknownJob(_) | Self::InvalidConfig(_)
        )
    }

    /// The admission reason, if this is a denial.
    #[must_use]
    pub const fn admission_reason(&self) -> Option<&AdmissionReason> {
        match self {
            Self::AdmissionDenied(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
