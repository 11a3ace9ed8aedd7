//! Plan-tier priority scheduling.
//!
//! [`PriorityPolicy`] decides which waiting tier a freed slot goes to and which
//! active job (if any) yields its slot to an incoming top-tier job. It is pure:
//! the queue manager evaluates it under the per-queue lock against a
//! [`DispatchView`] snapshot.
//!
//! Rules:
//!
//! - lowest numeric priority first, FIFO within a tier;
//! - when capacity is at least 2 and the lowest tier has waiting work but no
//!   active job, the last free slot is reserved for it;
//! - after `starvation_window` consecutive dispatches that skipped waiting
//!   lowest-tier work, the next slot goes to the lowest tier;
//! - a top-tier arrival on a saturated queue running only lower tiers
//!   preempts the most recently started lower-tier job, never one that was
//!   already preempted and never the sole active lowest-tier job when the
//!   reservation applies.
//!
//! [`PriorityScheduler`] is the admission facade layered over the queue
//! manager, tenant ledger and rate limiter.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::job::{JobObserver, JobPayload, TransitionEvent};
use crate::core::ledger::TenantLedger;
use crate::core::queue_manager::QueueManager;
use crate::core::rate_limiter::RateLimiter;
use crate::core::{AdmissionReason, SchedulerError};
use crate::util::clock::now_ms;
use crate::util::serde::{JobId, Priority, TenantId};

/// Scheduling-relevant facts about one active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSlot {
    /// Tier of the job.
    pub priority: Priority,
    /// Dispatch sequence number; larger means started more recently.
    pub started_seq: u64,
    /// Whether the job was already preempted once.
    pub preempted: bool,
}

/// Snapshot of a queue handed to the policy.
#[derive(Debug, Clone, Copy)]
pub struct DispatchView<'a> {
    /// Maximum concurrently active jobs.
    pub capacity: usize,
    /// Waiting jobs per tier, indexed by [`Priority::index`].
    pub waiting: [usize; 3],
    /// Currently active jobs.
    pub active: &'a [ActiveSlot],
    /// Dispatches since the lowest tier was last served while it had work.
    pub cycles_since_lowest: u32,
}

impl DispatchView<'_> {
    fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.active.len())
    }

    fn lowest_waiting(&self) -> bool {
        self.waiting[Priority::LOWEST.index()] > 0
    }

    fn lowest_active_count(&self) -> usize {
        self.active
            .iter()
            .filter(|slot| slot.priority == Priority::LOWEST)
            .count()
    }
}

/// Ordering, fairness and preemption rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPolicy {
    starvation_window: u32,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PriorityPolicy {
    /// Policy forcing lowest-tier service after `starvation_window` skips.
    #[must_use]
    pub fn new(starvation_window: u32) -> Self {
        Self {
            starvation_window: starvation_window.max(1),
        }
    }

    /// Configured starvation window.
    #[must_use]
    pub const fn starvation_window(&self) -> u32 {
        self.starvation_window
    }

    /// Tier the next free slot should be given to, or `None` when the queue
    /// is saturated or nothing is waiting.
    #[must_use]
    pub fn select_tier(&self, view: &DispatchView<'_>) -> Option<Priority> {
        if view.free_slots() == 0 {
            return None;
        }

        if view.lowest_waiting() {
            let reserved = view.capacity >= 2
                && view.free_slots() == 1
                && view.lowest_active_count() == 0;
            let starving = view.cycles_since_lowest >= self.starvation_window;
            if reserved || starving {
                return Some(Priority::LOWEST);
            }
        }

        Priority::ALL
            .into_iter()
            .find(|tier| view.waiting[tier.index()] > 0)
    }

    /// Index into `view.active` of the job that should yield its slot to an
    /// incoming job of `incoming` priority.
    #[must_use]
    pub fn preemption_target(&self, view: &DispatchView<'_>, incoming: Priority) -> Option<usize> {
        if incoming != Priority::Top || view.active.is_empty() || view.free_slots() > 0 {
            return None;
        }
        if view.active.iter().any(|slot| slot.priority <= incoming) {
            return None;
        }

        let protect_lowest = view.capacity >= 2 && view.lowest_active_count() == 1;
        view.active
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.preempted)
            .filter(|(_, slot)| !(protect_lowest && slot.priority == Priority::LOWEST))
            .max_by_key(|(_, slot)| slot.started_seq)
            .map(|(idx, _)| idx)
    }
}

/// A submission through the admission facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Target queue.
    pub queue_name: String,
    /// Submitting tenant.
    pub tenant_id: TenantId,
    /// Work descriptor.
    #[serde(default)]
    pub payload: JobPayload,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    /// Identifier of the admitted job.
    pub job_id: JobId,
    /// Tier the job was scheduled at.
    pub priority: Priority,
    /// Requests left in the tenant's rate-limit window.
    pub remaining: u32,
}

/// Admission facade: rate limit, tenant ceiling, then queue admission at the
/// tenant's plan tier.
#[derive(Clone)]
pub struct PriorityScheduler {
    queues: QueueManager,
    ledger: Arc<TenantLedger>,
    limiter: Arc<RateLimiter>,
    queue_counters: Arc<HashMap<String, String>>,
}

impl PriorityScheduler {
    /// Wire the facade and register the usage-release observer.
    pub fn new(
        queues: QueueManager,
        ledger: Arc<TenantLedger>,
        limiter: Arc<RateLimiter>,
        queue_counters: HashMap<String, String>,
    ) -> Self {
        queues.add_observer(Arc::new(UsageReleaser {
            ledger: Arc::clone(&ledger),
        }));
        Self {
            queues,
            ledger,
            limiter,
            queue_counters: Arc::new(queue_counters),
        }
    }

    /// Underlying queue manager.
    #[must_use]
    pub const fn queues(&self) -> &QueueManager {
        &self.queues
    }

    /// Rate-limit route used for submissions to `queue`.
    #[must_use]
    pub fn submit_route(queue: &str) -> String {
        format!("enqueue:{queue}")
    }

    /// Admit a job for `request.tenant_id` at the tenant's plan tier.
    ///
    /// # Errors
    ///
    /// - `AdmissionDenied(RateLimited)` when the tenant exhausted its budget
    /// - `AdmissionDenied(TenantLimitExceeded)` when the queue's counter is at
    ///   the plan ceiling
    /// - `AdmissionDenied(QueueFull | QueueInactive)` from the queue
    /// - `UnknownQueue` for an unconfigured queue
    pub async fn submit(&self, request: SubmitRequest) -> Result<Admission, SchedulerError> {
        let SubmitRequest {
            queue_name,
            tenant_id,
            payload,
        } = request;

        if !self.queues.has_queue(&queue_name) {
            return Err(SchedulerError::UnknownQueue(queue_name));
        }

        let decision = self
            .limiter
            .check_rate_limit(&tenant_id, &Self::submit_route(&queue_name));
        if !decision.allowed {
            tracing::warn!(
                tenant = %tenant_id,
                queue = %queue_name,
                reset_at_ms = decision.reset_time_ms,
                "submission rate limited"
            );
            return Err(SchedulerError::AdmissionDenied(AdmissionReason::RateLimited {
                reset_at_ms: decision.reset_time_ms,
            }));
        }

        let plan = self.ledger.plan_for(&tenant_id).await?;
        let counter = self.queue_counters.get(&queue_name).cloned();

        if let Some(counter) = counter.as_deref() {
            self.ledger.reserve(&tenant_id, counter, 1).await?;
        }

        match self.queues.enqueue_charged(
            &queue_name,
            &tenant_id,
            payload,
            plan.priority,
            counter.clone(),
        ) {
            Ok(job_id) => Ok(Admission {
                job_id,
                priority: plan.priority,
                remaining: decision.remaining,
            }),
            Err(err) => {
                if let Some(counter) = counter.as_deref() {
                    self.ledger.decrement_usage(&tenant_id, counter, 1);
                }
                Err(err)
            }
        }
    }

    /// Seconds-resolution helper for callers building `Retry-After` headers.
    #[must_use]
    pub fn retry_after_secs(reset_at_ms: u64) -> u64 {
        reset_at_ms.saturating_sub(now_ms()).div_ceil(1_000)
    }
}

/// Releases tenant usage once a charged job reaches a terminal state.
struct UsageReleaser {
    ledger: Arc<TenantLedger>,
}

impl JobObserver for UsageReleaser {
    fn on_transition(&self, event: &TransitionEvent) {
        if !event.to.is_terminal() {
            return;
        }
        if let Some(counter) = event.job.usage_counter.as_deref() {
            self.ledger.decrement_usage(&event.job.tenant, counter, 1);
        }
    }
}
