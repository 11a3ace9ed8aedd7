//! Named job queues: admission, dispatch, retries and operator controls.
//!
//! The queue manager is the sole owner of job state. Every queue keeps its
//! jobs behind one `parking_lot::Mutex`; admission, the dispatch decision,
//! preemption and completion handling all run inside that scope so two
//! workers can never claim the same job. Execution is spawned after the lock
//! is released, so no operation here waits on a unit of work.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{QueueConfig, QueueConfigPatch, SchedulingConfig};
use crate::core::executor::{JobContext, UnitOfWork, WorkFailure, WorkOutcome};
use crate::core::job::{Job, JobObserver, JobPayload, JobState, TransitionEvent};
use crate::core::scheduler::{ActiveSlot, DispatchView, PriorityPolicy};
use crate::core::signal::JobSignal;
use crate::core::spawn::Spawn;
use crate::core::{AdmissionReason, InactiveCause, SchedulerError};
use crate::util::clock::now_ms;
use crate::util::serde::{JobId, Priority};

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Queue name.
    pub queue_name: String,
    /// Jobs waiting for a slot.
    pub waiting: usize,
    /// Jobs holding a slot.
    pub active: usize,
    /// Jobs completed since start.
    pub completed: u64,
    /// Jobs failed since start.
    pub failed: u64,
    /// Active jobs sitting in a pre-run delay or retry backoff.
    pub delayed: usize,
    /// Jobs preempted and waiting for a slot to free.
    pub paused: usize,
    /// Jobs cancelled since start.
    pub cancelled: u64,
    /// `maxWorkers × concurrency`.
    pub capacity: usize,
    /// Waiting-job ceiling.
    pub max_queue_size: usize,
    /// Whether the queue admits and dispatches.
    pub is_active: bool,
    /// Whether the memory monitor closed admissions.
    pub throttled: bool,
    /// Preemptions performed since start.
    pub preemptions: u64,
    /// Retries scheduled since start.
    pub retries: u64,
}

/// Payload bytes held by a queue, for memory attribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadFootprint {
    /// Number of active jobs.
    pub active_jobs: usize,
    /// Serialized payload bytes of active jobs.
    pub active_bytes: usize,
    /// Serialized payload bytes of waiting and paused jobs.
    pub waiting_bytes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueCounters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    preemptions: u64,
    retries: u64,
}

struct LiveJob {
    job: Job,
    signal: JobSignal,
    /// Bumped on every dispatch and preemption; outcomes carrying an older
    /// value are discarded.
    run_id: u64,
    started_seq: u64,
    preempted: bool,
    delayed: bool,
}

impl LiveJob {
    fn is_current(&self, run_id: u64) -> bool {
        self.run_id == run_id && self.job.state == JobState::Active
    }
}

struct Launch {
    job_id: JobId,
    run_id: u64,
    signal: JobSignal,
    context: JobContext,
    delay_ms: u64,
}

#[derive(Default)]
struct Effects {
    events: Vec<TransitionEvent>,
    launches: Vec<Launch>,
}

enum Verdict {
    Retry { delay_ms: u64 },
    Done,
}

fn move_job(live: &mut LiveJob, to: JobState, now: u64, fx: &mut Effects) -> bool {
    match live.job.transition(to, now) {
        Ok(from) => {
            fx.events.push(TransitionEvent {
                job: live.job.clone(),
                from,
                to,
            });
            true
        }
        Err(e) => {
            error!(job_id = %live.job.id, error = %e, "rejected job transition");
            false
        }
    }
}

struct QueueState {
    name: String,
    config: QueueConfig,
    throttled: bool,
    jobs: HashMap<JobId, LiveJob>,
    waiting: [VecDeque<JobId>; 3],
    active: Vec<JobId>,
    preempted: VecDeque<JobId>,
    archive: VecDeque<Job>,
    counters: QueueCounters,
    dispatch_seq: u64,
    cycles_since_lowest: u32,
}

impl QueueState {
    fn new(name: &str, config: QueueConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            throttled: false,
            jobs: HashMap::new(),
            waiting: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            active: Vec::new(),
            preempted: VecDeque::new(),
            archive: VecDeque::new(),
            counters: QueueCounters::default(),
            dispatch_seq: 0,
            cycles_since_lowest: 0,
        }
    }

    fn waiting_len(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }

    fn active_slots(&self) -> Vec<ActiveSlot> {
        self.active
            .iter()
            .map(|id| {
                self.jobs.get(id).map_or(
                    ActiveSlot {
                        priority: Priority::Top,
                        started_seq: 0,
                        preempted: true,
                    },
                    |live| ActiveSlot {
                        priority: live.job.priority,
                        started_seq: live.started_seq,
                        preempted: live.preempted,
                    },
                )
            })
            .collect()
    }

    fn view<'a>(&self, slots: &'a [ActiveSlot]) -> DispatchView<'a> {
        DispatchView {
            capacity: self.config.capacity(),
            waiting: [
                self.waiting[0].len(),
                self.waiting[1].len(),
                self.waiting[2].len(),
            ],
            active: slots,
            cycles_since_lowest: self.cycles_since_lowest,
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queue_name: self.name.clone(),
            waiting: self.waiting_len(),
            active: self.active.len(),
            completed: self.counters.completed,
            failed: self.counters.failed,
            delayed: self
                .active
                .iter()
                .filter(|id| self.jobs.get(*id).is_some_and(|live| live.delayed))
                .count(),
            paused: self.preempted.len(),
            cancelled: self.counters.cancelled,
            capacity: self.config.capacity(),
            max_queue_size: self.config.max_queue_size,
            is_active: self.config.is_active,
            throttled: self.throttled,
            preemptions: self.counters.preemptions,
            retries: self.counters.retries,
        }
    }

    /// Yield the slot of a lower-tier job to an incoming top-tier job. The
    /// freed slot goes straight to the top tier, so neither the lowest-tier
    /// reservation nor the starvation window can claim it.
    fn try_preempt(
        &mut self,
        policy: &PriorityPolicy,
        incoming: Priority,
        now: u64,
        fx: &mut Effects,
    ) -> bool {
        let slots = self.active_slots();
        let view = self.view(&slots);
        let Some(idx) = policy.preemption_target(&view, incoming) else {
            return false;
        };
        let victim = self.active[idx].clone();
        let Some(live) = self.jobs.get_mut(&victim) else {
            return false;
        };

        if !live.signal.try_request_pause() {
            warn!(
                queue = %self.name,
                job_id = %victim,
                "preemption conflict: job is in a non-interruptible phase, falling back to FIFO admission"
            );
            return false;
        }
        if !move_job(live, JobState::Paused, now, fx) {
            return false;
        }
        live.preempted = true;
        live.delayed = false;
        live.run_id += 1;
        info!(
            queue = %self.name,
            job_id = %victim,
            priority = %live.job.priority,
            "preempted lower-priority job for top-tier arrival"
        );
        self.active.remove(idx);
        self.preempted.push_back(victim);
        self.counters.preemptions += 1;
        self.start_next(incoming, now, fx)
    }

    /// Fill free slots. When `slot_freed` is set, preempted jobs first return
    /// to the front of their tier.
    fn dispatch(&mut self, policy: &PriorityPolicy, slot_freed: bool, now: u64, fx: &mut Effects) {
        if !self.config.is_active {
            return;
        }
        let capacity = self.config.capacity();

        if slot_freed && self.active.len() < capacity {
            while let Some(id) = self.preempted.pop_back() {
                if let Some(live) = self.jobs.get_mut(&id) {
                    if move_job(live, JobState::Waiting, now, fx) {
                        self.waiting[live.job.priority.index()].push_front(id);
                    }
                }
            }
        }

        loop {
            let slots = self.active_slots();
            let view = self.view(&slots);
            let Some(tier) = policy.select_tier(&view) else {
                break;
            };
            if !self.start_next(tier, now, fx) {
                break;
            }
        }
    }

    /// Start the job at the front of `tier`. Returns `false` when the tier
    /// is empty.
    fn start_next(&mut self, tier: Priority, now: u64, fx: &mut Effects) -> bool {
        let lowest_was_waiting = !self.waiting[Priority::LOWEST.index()].is_empty();
        let Some(job_id) = self.waiting[tier.index()].pop_front() else {
            return false;
        };
        let Some(live) = self.jobs.get_mut(&job_id) else {
            return true;
        };

        live.job.attempts += 1;
        if !move_job(live, JobState::Active, now, fx) {
            return true;
        }
        self.dispatch_seq += 1;
        live.started_seq = self.dispatch_seq;
        live.run_id += 1;
        live.signal = JobSignal::new();
        live.delayed = self.config.delay_between_jobs > 0;

        debug!(
            queue = %self.name,
            job_id = %job_id,
            priority = %tier,
            attempt = live.job.attempts,
            "dispatching job"
        );
        fx.launches.push(Launch {
            job_id: job_id.clone(),
            run_id: live.run_id,
            signal: live.signal.clone(),
            context: JobContext {
                job_id: job_id.clone(),
                queue: self.name.clone(),
                tenant: live.job.tenant.clone(),
                priority: live.job.priority,
                attempt: live.job.attempts,
                payload: live.job.payload.clone(),
            },
            delay_ms: self.config.delay_between_jobs,
        });
        self.active.push(job_id);

        if tier == Priority::LOWEST {
            self.cycles_since_lowest = 0;
        } else if lowest_was_waiting {
            self.cycles_since_lowest += 1;
        }
        true
    }

    /// Move a live job to a terminal state and archive it.
    fn terminate(
        &mut self,
        job_id: &str,
        to: JobState,
        now: u64,
        scheduling: &SchedulingConfig,
        fx: &mut Effects,
    ) -> bool {
        let Some(mut live) = self.jobs.remove(job_id) else {
            return false;
        };
        match live.job.state {
            JobState::Waiting => {
                self.waiting[live.job.priority.index()].retain(|id| id != job_id);
            }
            JobState::Active => {
                self.active.retain(|id| id != job_id);
                if to == JobState::Cancelled {
                    live.signal.request_cancel();
                }
            }
            JobState::Paused => self.preempted.retain(|id| id != job_id),
            _ => {}
        }
        if !move_job(&mut live, to, now, fx) {
            return false;
        }
        match to {
            JobState::Completed => self.counters.completed += 1,
            JobState::Failed => self.counters.failed += 1,
            JobState::Cancelled => self.counters.cancelled += 1,
            _ => {}
        }
        self.archive.push_back(live.job);
        self.prune_archive(now, scheduling);
        true
    }

    fn prune_archive(&mut self, now: u64, scheduling: &SchedulingConfig) -> usize {
        let before = self.archive.len();
        while self.archive.len() > scheduling.max_archived_jobs {
            self.archive.pop_front();
        }
        while self.archive.front().is_some_and(|job| {
            job.finished_at_ms
                .is_some_and(|t| t.saturating_add(scheduling.job_retention_ms) < now)
        }) {
            self.archive.pop_front();
        }
        before - self.archive.len()
    }

    /// Record the outcome of an attempt.
    fn finish(
        &mut self,
        job_id: &str,
        run_id: u64,
        outcome: WorkOutcome,
        now: u64,
        policy: &PriorityPolicy,
        scheduling: &SchedulingConfig,
        fx: &mut Effects,
    ) -> Verdict {
        let retry_attempts = self.config.retry_attempts;
        let retry_delay = self.config.retry_delay;
        let Some(live) = self.jobs.get_mut(job_id) else {
            debug!(queue = %self.name, job_id, "outcome for job no longer live, ignoring");
            return Verdict::Done;
        };
        if !live.is_current(run_id) {
            debug!(queue = %self.name, job_id, "stale outcome ignored");
            return Verdict::Done;
        }

        let to = match outcome {
            WorkOutcome::Completed => {
                info!(queue = %self.name, job_id, "job completed");
                JobState::Completed
            }
            WorkOutcome::Cancelled => {
                info!(queue = %self.name, job_id, "job cancelled by unit of work");
                JobState::Cancelled
            }
            WorkOutcome::Failed(WorkFailure { message, transient }) => {
                live.job.last_error = Some(message.clone());
                if transient && live.job.attempts <= retry_attempts {
                    live.delayed = true;
                    self.counters.retries += 1;
                    warn!(
                        queue = %self.name,
                        job_id,
                        attempt = live.job.attempts,
                        retry_delay_ms = retry_delay,
                        error = %message,
                        "transient failure, retrying"
                    );
                    return Verdict::Retry {
                        delay_ms: retry_delay,
                    };
                }
                error!(
                    queue = %self.name,
                    job_id,
                    attempts = live.job.attempts,
                    error = %message,
                    "job failed"
                );
                JobState::Failed
            }
        };

        self.terminate(job_id, to, now, scheduling, fx);
        self.dispatch(policy, true, now, fx);
        Verdict::Done
    }
}

struct ManagedQueue {
    name: String,
    executor: Arc<dyn UnitOfWork>,
    state: Mutex<QueueState>,
}

struct ManagerInner {
    queues: HashMap<String, Arc<ManagedQueue>>,
    policy: PriorityPolicy,
    scheduling: SchedulingConfig,
    spawner: Arc<dyn Spawn>,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
    started_at_ms: u64,
}

/// Owner of all named queues and every job state transition.
///
/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.queue_names())
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    /// Create queues from static configuration.
    ///
    /// Every queue needs an executor, either its own entry in `executors` or
    /// `default_executor`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a queue configuration is invalid or a queue
    /// has no executor.
    pub fn new(
        configs: HashMap<String, QueueConfig>,
        scheduling: SchedulingConfig,
        executors: &HashMap<String, Arc<dyn UnitOfWork>>,
        default_executor: Option<Arc<dyn UnitOfWork>>,
        spawner: Arc<dyn Spawn>,
    ) -> Result<Self, SchedulerError> {
        let mut queues = HashMap::with_capacity(configs.len());
        for (name, config) in configs {
            config
                .validate()
                .map_err(|e| SchedulerError::InvalidConfig(format!("queue `{name}`: {e}")))?;
            let executor = executors
                .get(&name)
                .cloned()
                .or_else(|| default_executor.clone())
                .ok_or_else(|| {
                    SchedulerError::InvalidConfig(format!("queue `{name}` has no executor"))
                })?;
            info!(
                queue = %name,
                capacity = config.capacity(),
                max_queue_size = config.max_queue_size,
                "queue initialized"
            );
            queues.insert(
                name.clone(),
                Arc::new(ManagedQueue {
                    state: Mutex::new(QueueState::new(&name, config)),
                    name,
                    executor,
                }),
            );
        }

        Ok(Self {
            inner: Arc::new(ManagerInner {
                queues,
                policy: PriorityPolicy::new(scheduling.starvation_window),
                scheduling,
                spawner,
                observers: RwLock::new(Vec::new()),
                started_at_ms: now_ms(),
            }),
        })
    }

    /// Register a transition observer.
    ///
    /// Observers run while the queue lock is held and must not call back
    /// into the queue manager.
    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Whether `name` is a configured queue.
    #[must_use]
    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.contains_key(name)
    }

    /// Sorted queue names.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Manager start time, epoch milliseconds.
    #[must_use]
    pub fn started_at_ms(&self) -> u64 {
        self.inner.started_at_ms
    }

    fn queue(&self, name: &str) -> Result<&Arc<ManagedQueue>, SchedulerError> {
        self.inner
            .queues
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownQueue(name.to_string()))
    }

    fn notify(&self, events: &[TransitionEvent]) {
        if events.is_empty() {
            return;
        }
        let observers = self.inner.observers.read();
        for event in events {
            for observer in observers.iter() {
                observer.on_transition(event);
            }
        }
    }

    /// Admit a job into `queue` at `priority`.
    ///
    /// # Errors
    ///
    /// - `AdmissionDenied(QueueInactive)` if the queue is paused or throttled
    /// - `AdmissionDenied(QueueFull)` if `maxQueueSize` jobs are waiting
    /// - `UnknownQueue` if the queue does not exist
    pub fn enqueue(
        &self,
        queue: &str,
        tenant: &str,
        payload: JobPayload,
        priority: Priority,
    ) -> Result<JobId, SchedulerError> {
        self.enqueue_charged(queue, tenant, payload, priority, None)
    }

    /// Admit a job that holds tenant usage on `usage_counter` until it
    /// reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Same as [`QueueManager::enqueue`].
    pub fn enqueue_charged(
        &self,
        queue: &str,
        tenant: &str,
        payload: JobPayload,
        priority: Priority,
        usage_counter: Option<String>,
    ) -> Result<JobId, SchedulerError> {
        let q = self.queue(queue)?;
        let now = now_ms();
        let (job_id, launches) = {
            let mut state = q.state.lock();
            if !state.config.is_active || state.throttled {
                let cause = if state.config.is_active {
                    InactiveCause::MemoryPressure
                } else {
                    InactiveCause::Paused
                };
                warn!(queue, tenant, ?cause, "job rejected: queue inactive");
                return Err(SchedulerError::AdmissionDenied(AdmissionReason::QueueInactive {
                    queue: queue.to_string(),
                    cause,
                }));
            }
            if state.waiting_len() >= state.config.max_queue_size {
                warn!(
                    queue,
                    tenant,
                    waiting = state.waiting_len(),
                    "job rejected: queue full"
                );
                return Err(SchedulerError::AdmissionDenied(AdmissionReason::QueueFull {
                    queue: queue.to_string(),
                }));
            }

            let mut job = Job::new(queue, tenant, priority, payload, now);
            job.usage_counter = usage_counter;
            let job_id = job.id.clone();
            state.waiting[priority.index()].push_back(job_id.clone());
            state.jobs.insert(
                job_id.clone(),
                LiveJob {
                    job,
                    signal: JobSignal::new(),
                    run_id: 0,
                    started_seq: 0,
                    preempted: false,
                    delayed: false,
                },
            );
            info!(queue, tenant, job_id = %job_id, %priority, "job enqueued");

            let mut fx = Effects::default();
            if !state.try_preempt(&self.inner.policy, priority, now, &mut fx) {
                state.dispatch(&self.inner.policy, false, now, &mut fx);
            }
            self.notify(&fx.events);
            (job_id, fx.launches)
        };
        self.spawn_all(q, launches);
        Ok(job_id)
    }

    /// Stop dispatching and admitting on `queue`. Active jobs keep running.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn pause_queue(&self, queue: &str) -> Result<(), SchedulerError> {
        let q = self.queue(queue)?;
        q.state.lock().config.is_active = false;
        info!(queue, "queue paused");
        Ok(())
    }

    /// Resume dispatching and admitting on `queue`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn resume_queue(&self, queue: &str) -> Result<(), SchedulerError> {
        let q = self.queue(queue)?;
        let launches = {
            let mut state = q.state.lock();
            state.config.is_active = true;
            let mut fx = Effects::default();
            state.dispatch(&self.inner.policy, true, now_ms(), &mut fx);
            self.notify(&fx.events);
            fx.launches
        };
        info!(queue, "queue resumed");
        self.spawn_all(q, launches);
        Ok(())
    }

    /// Cancel every waiting and paused job; active jobs are left alone.
    /// Returns the number of jobs cancelled.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn clear_queue(&self, queue: &str) -> Result<usize, SchedulerError> {
        let q = self.queue(queue)?;
        let now = now_ms();
        let mut state = q.state.lock();
        let mut ids: Vec<JobId> = state.waiting.iter().flatten().cloned().collect();
        ids.extend(state.preempted.iter().cloned());

        let mut fx = Effects::default();
        let cleared = ids
            .iter()
            .filter(|id| {
                state.terminate(id, JobState::Cancelled, now, &self.inner.scheduling, &mut fx)
            })
            .count();
        self.notify(&fx.events);
        drop(state);
        info!(queue, cleared, "queue cleared");
        Ok(cleared)
    }

    /// Cancel a waiting, paused or active job.
    ///
    /// Active jobs are signalled and their slot is released at once; the unit
    /// of work is expected to observe the signal and exit. Returns `false` if
    /// the job already reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` or `UnknownJob`.
    pub fn cancel_job(&self, queue: &str, job_id: &str) -> Result<bool, SchedulerError> {
        let q = self.queue(queue)?;
        let now = now_ms();
        let launches = {
            let mut state = q.state.lock();
            let Some(live) = state.jobs.get(job_id) else {
                return if state.archive.iter().any(|job| job.id == job_id) {
                    Ok(false)
                } else {
                    Err(SchedulerError::UnknownJob(job_id.to_string()))
                };
            };
            let was_active = live.job.state == JobState::Active;

            let mut fx = Effects::default();
            state.terminate(job_id, JobState::Cancelled, now, &self.inner.scheduling, &mut fx);
            if was_active {
                state.dispatch(&self.inner.policy, true, now, &mut fx);
            }
            self.notify(&fx.events);
            fx.launches
        };
        info!(queue, job_id, "job cancelled");
        self.spawn_all(q, launches);
        Ok(true)
    }

    /// Open or close admissions on `queue` under memory pressure. Returns
    /// whether the flag changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn set_admission_throttle(&self, queue: &str, throttled: bool) -> Result<bool, SchedulerError> {
        let q = self.queue(queue)?;
        let mut state = q.state.lock();
        let changed = state.throttled != throttled;
        state.throttled = throttled;
        drop(state);
        if changed {
            if throttled {
                warn!(queue, "admissions throttled by memory pressure");
            } else {
                info!(queue, "admissions restored");
            }
        }
        Ok(changed)
    }

    /// Apply a configuration patch; capacity changes take effect on the next
    /// dispatch and never interrupt active jobs.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue`, or `InvalidConfig` without mutating anything.
    pub fn update_config(
        &self,
        queue: &str,
        patch: &QueueConfigPatch,
    ) -> Result<QueueConfig, SchedulerError> {
        let q = self.queue(queue)?;
        let (merged, launches) = {
            let mut state = q.state.lock();
            let merged = patch.apply(&state.config);
            merged
                .validate()
                .map_err(|e| SchedulerError::InvalidConfig(format!("queue `{queue}`: {e}")))?;
            state.config = merged.clone();
            let mut fx = Effects::default();
            state.dispatch(&self.inner.policy, true, now_ms(), &mut fx);
            self.notify(&fx.events);
            (merged, fx.launches)
        };
        info!(queue, config = ?merged, "queue configuration updated");
        self.spawn_all(q, launches);
        Ok(merged)
    }

    /// Current configuration of `queue`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn config(&self, queue: &str) -> Result<QueueConfig, SchedulerError> {
        Ok(self.queue(queue)?.state.lock().config.clone())
    }

    /// Configuration of every queue, keyed by name.
    #[must_use]
    pub fn configs(&self) -> BTreeMap<String, QueueConfig> {
        self.inner
            .queues
            .iter()
            .map(|(name, q)| (name.clone(), q.state.lock().config.clone()))
            .collect()
    }

    /// Counts per state for `queue`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn get_queue_stats(&self, queue: &str) -> Result<QueueStats, SchedulerError> {
        Ok(self.queue(queue)?.state.lock().stats())
    }

    /// Counts per state for every queue, sorted by name.
    #[must_use]
    pub fn get_all_queue_stats(&self) -> Vec<QueueStats> {
        self.queue_names()
            .iter()
            .filter_map(|name| self.get_queue_stats(name).ok())
            .collect()
    }

    /// Snapshot of a live or archived job.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` or `UnknownJob`.
    pub fn get_job(&self, queue: &str, job_id: &str) -> Result<Job, SchedulerError> {
        let q = self.queue(queue)?;
        let state = q.state.lock();
        if let Some(live) = state.jobs.get(job_id) {
            return Ok(live.job.clone());
        }
        state
            .archive
            .iter()
            .rev()
            .find(|job| job.id == job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.to_string()))
    }

    /// Payload bytes held by `queue`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownQueue` if the queue does not exist.
    pub fn payload_footprint(&self, queue: &str) -> Result<PayloadFootprint, SchedulerError> {
        let q = self.queue(queue)?;
        let state = q.state.lock();
        let mut footprint = PayloadFootprint::default();
        for live in state.jobs.values() {
            let size = live.job.payload_size();
            if live.job.state == JobState::Active {
                footprint.active_jobs += 1;
                footprint.active_bytes += size;
            } else {
                footprint.waiting_bytes += size;
            }
        }
        Ok(footprint)
    }

    /// Drop archived jobs past the retention window. Returns how many were
    /// removed.
    pub fn purge_archived(&self, now_ms: u64) -> usize {
        self.inner
            .queues
            .values()
            .map(|q| q.state.lock().prune_archive(now_ms, &self.inner.scheduling))
            .sum()
    }

    fn spawn_all(&self, queue: &Arc<ManagedQueue>, launches: Vec<Launch>) {
        for launch in launches {
            let manager = self.clone();
            let queue = Arc::clone(queue);
            self.inner
                .spawner
                .spawn(Box::pin(async move { manager.run_job(queue, launch).await }));
        }
    }

    fn end_delay(&self, queue: &ManagedQueue, job_id: &str, run_id: u64) -> bool {
        let mut state = queue.state.lock();
        match state.jobs.get_mut(job_id) {
            Some(live) if live.is_current(run_id) => {
                live.delayed = false;
                true
            }
            _ => false,
        }
    }

    fn begin_retry(&self, queue: &ManagedQueue, job_id: &str, run_id: u64) -> Option<u32> {
        let mut state = queue.state.lock();
        let live = state.jobs.get_mut(job_id)?;
        if !live.is_current(run_id) || live.signal.should_stop() {
            return None;
        }
        live.delayed = false;
        live.job.attempts += 1;
        Some(live.job.attempts)
    }

    fn finish_attempt(
        &self,
        queue: &Arc<ManagedQueue>,
        job_id: &str,
        run_id: u64,
        outcome: WorkOutcome,
    ) -> Verdict {
        let (verdict, launches) = {
            let mut state = queue.state.lock();
            let mut fx = Effects::default();
            let verdict = state.finish(
                job_id,
                run_id,
                outcome,
                now_ms(),
                &self.inner.policy,
                &self.inner.scheduling,
                &mut fx,
            );
            self.notify(&fx.events);
            (verdict, fx.launches)
        };
        self.spawn_all(queue, launches);
        verdict
    }

    async fn run_job(self, queue: Arc<ManagedQueue>, launch: Launch) {
        let Launch {
            job_id,
            run_id,
            signal,
            mut context,
            delay_ms,
        } = launch;

        if delay_ms > 0 {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                () = signal.requested() => {}
            }
            if !self.end_delay(&queue, &job_id, run_id) {
                return;
            }
        }

        loop {
            let outcome = AssertUnwindSafe(queue.executor.run(context.clone(), signal.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unit of work panicked".to_string());
                    error!(queue = %queue.name, job_id = %job_id, %message, "unit of work panicked");
                    WorkOutcome::Failed(WorkFailure::terminal(message))
                });

            match self.finish_attempt(&queue, &job_id, run_id, outcome) {
                Verdict::Retry { delay_ms } => {
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                        () = signal.requested() => {}
                    }
                    match self.begin_retry(&queue, &job_id, run_id) {
                        Some(attempt) => context.attempt = attempt,
                        None => return,
                    }
                }
                Verdict::Done => return,
            }
        }
    }
}
