//! Process memory sampling, pressure classification and load shedding.
//!
//! The monitor never touches queue internals. Under critical pressure it
//! closes admissions on the busiest queue through
//! [`QueueManager::set_admission_throttle`], one more queue per critical
//! check, and reopens all of them once usage falls below the warning
//! threshold.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::MemoryConfig;
use crate::core::queue_manager::QueueManager;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// Raw used/total sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReading {
    /// Bytes in use by the process.
    pub used_bytes: u64,
    /// Bytes available to the process.
    pub total_bytes: u64,
}

/// Where memory readings come from.
pub trait MemorySource: Send + Sync {
    /// Take one reading.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the platform cannot be read.
    fn sample(&self) -> Result<MemoryReading, SchedulerError>;
}

/// Pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    /// Below the warning threshold.
    Normal,
    /// At or above warning, below critical.
    Warning,
    /// At or above the critical threshold.
    Critical,
}

/// One classified sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Sample time, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available.
    pub total_bytes: u64,
    /// `used / total`.
    pub usage_ratio: f64,
    /// Classification against the configured thresholds.
    pub level: PressureLevel,
}

/// Best-effort memory attribution for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMemory {
    /// Queue name.
    pub queue_name: String,
    /// Active jobs in the queue.
    pub active_jobs: usize,
    /// Payload bytes of active jobs.
    pub active_payload_bytes: usize,
    /// Payload bytes of waiting and paused jobs.
    pub waiting_payload_bytes: usize,
    /// Share of process memory attributed to the queue's in-flight work.
    pub share: f64,
    /// `share × used bytes`.
    pub estimated_bytes: u64,
}

/// Diagnostic record of a pressure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAlert {
    /// Event time, epoch milliseconds.
    pub timestamp_ms: u64,
    /// Level at the time of the event.
    pub level: PressureLevel,
    /// Usage ratio at the time of the event.
    pub usage_ratio: f64,
    /// What happened.
    pub message: String,
    /// Queues whose admissions were closed by this event.
    pub throttled_queues: Vec<String>,
}

/// Samples memory and throttles admissions under pressure.
pub struct MemoryMonitor {
    config: MemoryConfig,
    source: Arc<dyn MemorySource>,
    queues: QueueManager,
    last: Mutex<Option<MemoryStats>>,
    alerts: Mutex<VecDeque<MemoryAlert>>,
    throttled: Mutex<BTreeSet<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("config", &self.config)
            .field("throttled", &*self.throttled.lock())
            .finish_non_exhaustive()
    }
}

impl MemoryMonitor {
    /// Monitor reading from `source` and acting on `queues`.
    #[must_use]
    pub fn new(config: MemoryConfig, source: Arc<dyn MemorySource>, queues: QueueManager) -> Self {
        Self {
            config,
            source,
            queues,
            last: Mutex::new(None),
            alerts: Mutex::new(VecDeque::new()),
            throttled: Mutex::new(BTreeSet::new()),
            task: Mutex::new(None),
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Classify a usage ratio.
    #[must_use]
    pub fn classify(&self, usage_ratio: f64) -> PressureLevel {
        if usage_ratio >= self.config.critical_threshold {
            PressureLevel::Critical
        } else if usage_ratio >= self.config.warning_threshold {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    /// Take and classify a fresh sample.
    ///
    /// # Errors
    ///
    /// Propagates memory source failures.
    pub fn get_memory_stats(&self) -> Result<MemoryStats, SchedulerError> {
        let reading = self.source.sample()?;
        #[allow(clippy::cast_precision_loss)]
        let usage_ratio = if reading.total_bytes == 0 {
            0.0
        } else {
            reading.used_bytes as f64 / reading.total_bytes as f64
        };
        let stats = MemoryStats {
            timestamp_ms: now_ms(),
            used_bytes: reading.used_bytes,
            total_bytes: reading.total_bytes,
            usage_ratio,
            level: self.classify(usage_ratio),
        };
        *self.last.lock() = Some(stats.clone());
        Ok(stats)
    }

    /// Most recent sample, if any.
    #[must_use]
    pub fn last_stats(&self) -> Option<MemoryStats> {
        self.last.lock().clone()
    }

    /// Attribute process memory to queues in proportion to the payload size
    /// of their active jobs.
    ///
    /// # Errors
    ///
    /// Propagates memory source failures.
    pub fn get_queue_memory_breakdown(&self) -> Result<Vec<QueueMemory>, SchedulerError> {
        let used = self.get_memory_stats()?.used_bytes;
        let footprints: Vec<_> = self
            .queues
            .queue_names()
            .into_iter()
            .filter_map(|name| {
                self.queues
                    .payload_footprint(&name)
                    .ok()
                    .map(|footprint| (name, footprint))
            })
            .collect();
        let total_active: usize = footprints.iter().map(|(_, f)| f.active_bytes).sum();

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let breakdown = footprints
            .into_iter()
            .map(|(queue_name, footprint)| {
                let share = if total_active == 0 {
                    0.0
                } else {
                    footprint.active_bytes as f64 / total_active as f64
                };
                QueueMemory {
                    queue_name,
                    active_jobs: footprint.active_jobs,
                    active_payload_bytes: footprint.active_bytes,
                    waiting_payload_bytes: footprint.waiting_bytes,
                    share,
                    estimated_bytes: (used as f64 * share) as u64,
                }
            })
            .collect();
        Ok(breakdown)
    }

    /// Sample memory and react: throttle under critical pressure, lift
    /// throttles once below warning. Returns whether new admissions were
    /// closed by this call.
    ///
    /// # Errors
    ///
    /// Propagates memory source failures.
    pub fn check_memory_and_take_action(&self) -> Result<bool, SchedulerError> {
        let stats = self.get_memory_stats()?;
        match stats.level {
            PressureLevel::Critical => Ok(self.shed_load(&stats)),
            PressureLevel::Warning => {
                warn!(
                    usage_ratio = stats.usage_ratio,
                    used_bytes = stats.used_bytes,
                    "memory pressure at warning level"
                );
                self.record_alert(&stats, "memory usage above warning threshold".into(), Vec::new());
                Ok(false)
            }
            PressureLevel::Normal => {
                self.recover(&stats);
                Ok(false)
            }
        }
    }

    fn shed_load(&self, stats: &MemoryStats) -> bool {
        let mut throttled = self.throttled.lock();
        let candidates: Vec<(String, usize)> = self
            .queues
            .get_all_queue_stats()
            .into_iter()
            .filter(|s| !throttled.contains(&s.queue_name))
            .map(|s| (s.queue_name, s.waiting))
            .collect();
        let Some(busiest) = candidates.iter().map(|(_, waiting)| *waiting).max() else {
            error!(
                usage_ratio = stats.usage_ratio,
                "memory critical with every queue already throttled"
            );
            return false;
        };

        let mut newly = Vec::new();
        for (name, waiting) in candidates {
            if waiting != busiest {
                continue;
            }
            if self.queues.set_admission_throttle(&name, true).unwrap_or(false) {
                throttled.insert(name.clone());
                newly.push(name);
            }
        }
        drop(throttled);

        error!(
            usage_ratio = stats.usage_ratio,
            used_bytes = stats.used_bytes,
            throttled = ?newly,
            "memory critical, closing admissions"
        );
        let acted = !newly.is_empty();
        self.record_alert(stats, "memory usage above critical threshold".into(), newly);
        acted
    }

    fn recover(&self, stats: &MemoryStats) {
        let released: Vec<String> = std::mem::take(&mut *self.throttled.lock())
            .into_iter()
            .collect();
        if released.is_empty() {
            return;
        }
        for name in &released {
            if let Err(e) = self.queues.set_admission_throttle(name, false) {
                warn!(queue = %name, error = %e, "failed to lift memory throttle");
            }
        }
        info!(
            usage_ratio = stats.usage_ratio,
            released = ?released,
            "memory recovered, admissions restored"
        );
        self.record_alert(stats, format!("memory recovered, reopened {}", released.join(", ")), Vec::new());
    }

    fn record_alert(&self, stats: &MemoryStats, message: String, throttled_queues: Vec<String>) {
        let mut alerts = self.alerts.lock();
        alerts.push_back(MemoryAlert {
            timestamp_ms: stats.timestamp_ms,
            level: stats.level,
            usage_ratio: stats.usage_ratio,
            message,
            throttled_queues,
        });
        while alerts.len() > self.config.alert_history {
            alerts.pop_front();
        }
    }

    /// Recent pressure events, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<MemoryAlert> {
        self.alerts.lock().iter().cloned().collect()
    }

    /// Queues currently throttled by the monitor.
    #[must_use]
    pub fn throttled_queues(&self) -> Vec<String> {
        self.throttled.lock().iter().cloned().collect()
    }

    /// Start the sampling loop. Returns `false` without doing anything when
    /// the loop is already running.
    pub fn start_memory_monitoring(self: &Arc<Self>, interval_ms: u64) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let monitor: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(interval_ms.max(1));
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                if let Err(e) = monitor.check_memory_and_take_action() {
                    warn!(error = %e, "memory sample failed");
                }
            }
        }));
        info!(interval_ms, "memory monitoring started");
        true
    }

    /// Stop the sampling loop. Returns whether a loop was running.
    pub fn stop_memory_monitoring(&self) -> bool {
        let Some(handle) = self.task.lock().take() else {
            return false;
        };
        handle.abort();
        info!("memory monitoring stopped");
        true
    }

    /// Whether the sampling loop is running.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
