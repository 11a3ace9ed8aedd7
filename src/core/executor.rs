//! The unit-of-work seam: crawling and analysis live behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::job::JobPayload;
use super::signal::JobSignal;
use crate::util::serde::{JobId, Priority, TenantId};

/// Everything a unit of work learns about the job it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    /// Job identifier.
    pub job_id: JobId,
    /// Owning queue.
    pub queue: String,
    /// Submitting tenant.
    pub tenant: TenantId,
    /// Tier of the job.
    pub priority: Priority,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Work descriptor.
    pub payload: JobPayload,
}

/// Failure reported by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkFailure {
    /// Error recorded on the job.
    pub message: String,
    /// Whether the queue's retry policy may try again.
    pub transient: bool,
}

impl WorkFailure {
    /// A failure worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// A failure that must not be retried.
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOutcome {
    /// The work finished.
    Completed,
    /// The work observed a stop request and exited early.
    Cancelled,
    /// The work failed.
    Failed(WorkFailure),
}

/// Abstraction for the crawler/analyzer invoked by queue workers.
///
/// # Contract
///
/// The scheduler does not time out or kill running work. Implementations must:
///
/// - enforce their own maximum runtime;
/// - poll `signal.should_stop()` (or race `signal.requested()`) at safe points
///   and return [`WorkOutcome::Cancelled`] when a stop was requested;
/// - hold `signal.enter_critical()` around phases that must not be
///   interrupted, which makes the job immune to preemption for that span.
///
/// A panic inside `run` is caught and recorded as a terminal failure.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use crawl_admission::core::{JobContext, JobSignal, UnitOfWork, WorkOutcome};
///
/// struct PageCrawler;
///
/// #[async_trait]
/// impl UnitOfWork for PageCrawler {
///     async fn run(&self, job: JobContext, signal: JobSignal) -> WorkOutcome {
///         for url in job.payload["urls"].as_array().into_iter().flatten() {
///             if signal.should_stop() {
///                 return WorkOutcome::Cancelled;
///             }
///             // fetch and analyze `url`...
///         }
///         WorkOutcome::Completed
///     }
/// }
/// ```
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    /// Run one attempt of the job.
    async fn run(&self, job: JobContext, signal: JobSignal) -> WorkOutcome;
}
