//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crawl_admission::config::{QueueConfig, SchedulingConfig};
use crawl_admission::core::{
    JobContext, JobObserver, JobSignal, JobState, QueueManager, TransitionEvent, UnitOfWork,
    WorkFailure, WorkOutcome,
};
use crawl_admission::runtime::TokioSpawner;
use crawl_admission::util::{JobId, Priority};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Unit of work driven by the job payload.
///
/// `{"name": n}` waits for gate `n` (or a stop request). The optional `mode`
/// field selects other behaviours:
///
/// - `instant`: completes at once
/// - `sleep`: sleeps `ms` milliseconds, then completes
/// - `flaky`: fails transiently until attempt `succeedOn`
/// - `broken`: always fails transiently
/// - `panic`: panics
/// - `critical`: enters a critical section, opens gate `{name}:entered`,
///   then waits for gate `n` ignoring stop requests
#[derive(Default)]
pub struct ScriptedWork {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedWork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate(&self, name: &str) -> Arc<Notify> {
        Arc::clone(self.gates.lock().entry(name.to_string()).or_default())
    }

    pub fn open(&self, name: &str) {
        self.gate(name).notify_one();
    }
}

#[async_trait]
impl UnitOfWork for ScriptedWork {
    async fn run(&self, job: JobContext, signal: JobSignal) -> WorkOutcome {
        let name = job.payload["name"].as_str().unwrap_or_default().to_string();
        match job.payload["mode"].as_str() {
            Some("instant") => WorkOutcome::Completed,
            Some("sleep") => {
                let ms = job.payload["ms"].as_u64().unwrap_or(1);
                tokio::select! {
                    biased;
                    () = signal.requested() => WorkOutcome::Cancelled,
                    () = tokio::time::sleep(Duration::from_millis(ms)) => WorkOutcome::Completed,
                }
            }
            Some("flaky") => {
                let succeed_on = job.payload["succeedOn"].as_u64().unwrap_or(1);
                if u64::from(job.attempt) < succeed_on {
                    WorkOutcome::Failed(WorkFailure::transient("upstream timed out"))
                } else {
                    WorkOutcome::Completed
                }
            }
            Some("broken") => WorkOutcome::Failed(WorkFailure::transient("connection refused")),
            Some("panic") => panic!("crawler exploded"),
            Some("critical") => {
                let _guard = signal.enter_critical();
                self.open(&format!("{name}:entered"));
                self.gate(&name).notified().await;
                WorkOutcome::Completed
            }
            _ => {
                // A stopped attempt must not consume the gate meant for the
                // next one.
                let gate = self.gate(&name);
                tokio::select! {
                    biased;
                    () = signal.requested() => WorkOutcome::Cancelled,
                    () = gate.notified() => WorkOutcome::Completed,
                }
            }
        }
    }
}

/// Records every transition in order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(JobId, Priority, JobState, JobState)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transitions_for(&self, job_id: &str) -> Vec<(JobState, JobState)> {
        self.events
            .lock()
            .iter()
            .filter(|(id, ..)| id == job_id)
            .map(|(_, _, from, to)| (*from, *to))
            .collect()
    }

    pub fn all(&self) -> Vec<(JobId, Priority, JobState, JobState)> {
        self.events.lock().clone()
    }

    /// Tiers in the order jobs were dispatched.
    pub fn dispatch_order(&self) -> Vec<(JobId, Priority)> {
        self.events
            .lock()
            .iter()
            .filter(|(.., to)| *to == JobState::Active)
            .map(|(id, priority, ..)| (id.clone(), *priority))
            .collect()
    }
}

impl JobObserver for Recorder {
    fn on_transition(&self, event: &TransitionEvent) {
        self.events
            .lock()
            .push((event.job.id.clone(), event.job.priority, event.from, event.to));
    }
}

/// Tracks the number of active jobs and its high-water mark.
#[derive(Default)]
pub struct ActiveProbe {
    current: AtomicI64,
    peak: AtomicI64,
}

impl ActiveProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::SeqCst)
    }
}

impl JobObserver for ActiveProbe {
    fn on_transition(&self, event: &TransitionEvent) {
        if event.to == JobState::Active {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }
        if event.from == JobState::Active {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Queue configuration without delays or retries.
pub fn queue_config(max_workers: u32, concurrency: u32, max_queue_size: usize) -> QueueConfig {
    QueueConfig {
        max_workers,
        max_queue_size,
        concurrency,
        delay_between_jobs: 0,
        retry_attempts: 0,
        retry_delay: 0,
        is_active: true,
    }
}

/// Manager over the named queues, all served by `work`.
pub fn manager(queues: &[(&str, QueueConfig)], work: Arc<ScriptedWork>) -> QueueManager {
    let configs = queues
        .iter()
        .map(|(name, cfg)| ((*name).to_string(), cfg.clone()))
        .collect();
    let executor: Arc<dyn UnitOfWork> = work;
    QueueManager::new(
        configs,
        SchedulingConfig::default(),
        &HashMap::new(),
        Some(executor),
        Arc::new(TokioSpawner::current()),
    )
    .unwrap()
}

/// Poll `check` until it holds, failing after two seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until `job_id` in `queue` reaches `state`.
pub async fn wait_for_state(m: &QueueManager, queue: &str, job_id: &str, state: JobState) {
    eventually(&format!("{job_id} to become {state}"), || {
        m.get_job(queue, job_id).map(|j| j.state).ok() == Some(state)
    })
    .await;
}
