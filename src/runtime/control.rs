//! Operator control plane: typed admin actions over the scheduler context.
//!
//! Requests are fixed records; unknown fields are rejected at
//! deserialization. Every action, applied or refused, is written to the
//! audit sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builders::SchedulerContext;
use crate::config::{QueueConfig, QueueConfigPatch};
use crate::core::performance::build_report;
use crate::core::{
    AuditEntry, MemoryAlert, MemoryStats, PerformanceReport, QueueMemory, QueueStats,
    SchedulerError,
};
use crate::util::clock::now_ms;

/// Action accepted by `POST /queues/control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAction {
    /// Stop dispatching and admitting.
    Pause,
    /// Resume dispatching and admitting.
    Resume,
    /// Cancel waiting and paused jobs.
    Clear,
    /// Cancel one job.
    CancelJob,
    /// Report queue counts.
    GetStats,
}

impl QueueAction {
    const fn name(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Clear => "clear",
            Self::CancelJob => "cancel_job",
            Self::GetStats => "get_stats",
        }
    }
}

/// Body of `POST /queues/control`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueControlRequest {
    /// What to do.
    pub action: QueueAction,
    /// Target queue.
    pub queue_name: String,
    /// Target job, required by `cancel_job`.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Result of a control action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Whether the action was applied.
    pub success: bool,
    /// Queue counts, for `get_stats`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<QueueStats>,
    /// Jobs cancelled by `clear`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<usize>,
}

/// Body of `PUT /queues/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigUpdateRequest {
    /// Target queue.
    pub queue_name: String,
    /// Fields to change.
    pub config: QueueConfigPatch,
}

/// Result of a configuration update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdateResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// The configuration now in effect.
    pub config: QueueConfig,
}

/// Action accepted by `POST /memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAction {
    /// Sample and react to pressure.
    CheckMemory,
    /// Report per-queue attribution.
    GetBreakdown,
    /// Start the sampling loop.
    StartMonitoring,
    /// Stop the sampling loop.
    StopMonitoring,
}

impl MemoryAction {
    const fn name(self) -> &'static str {
        match self {
            Self::CheckMemory => "check_memory",
            Self::GetBreakdown => "get_breakdown",
            Self::StartMonitoring => "start_monitoring",
            Self::StopMonitoring => "stop_monitoring",
        }
    }
}

/// Body of `POST /memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MemoryControlRequest {
    /// What to do.
    pub action: MemoryAction,
    /// Sampling interval for `start_monitoring`; defaults to the configured
    /// interval.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// Result of a memory action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryControlResponse {
    /// Human-readable outcome.
    pub message: String,
    /// Whether the action was applied.
    pub success: bool,
    /// Whether `check_memory` closed admissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_taken: Option<bool>,
    /// Sample taken by `check_memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_stats: Option<MemoryStats>,
    /// Attribution for `get_breakdown`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_memory_breakdown: Option<Vec<QueueMemory>>,
}

/// Body of `GET /memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryOverview {
    /// Fresh sample.
    pub memory_stats: MemoryStats,
    /// Per-queue attribution.
    pub queue_memory_breakdown: Vec<QueueMemory>,
    /// Response time, epoch milliseconds.
    pub timestamp: u64,
    /// Recent pressure events.
    pub alerts: Vec<MemoryAlert>,
    /// Queues throttled by the monitor.
    pub throttled_queues: Vec<String>,
    /// Whether the sampling loop is running.
    pub monitoring: bool,
}

/// Admin operations over one scheduler context.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    ctx: SchedulerContext,
}

impl ControlPlane {
    /// Control plane over `ctx`.
    #[must_use]
    pub const fn new(ctx: SchedulerContext) -> Self {
        Self { ctx }
    }

    /// The wrapped context.
    #[must_use]
    pub const fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    fn audit<T>(
        &self,
        entry: AuditEntry,
        result: Result<T, SchedulerError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Result<T, SchedulerError> {
        let entry = match &result {
            Ok(value) => AuditEntry {
                success: true,
                detail: describe(value),
                ..entry
            },
            Err(e) => AuditEntry {
                success: false,
                detail: e.to_string(),
                ..entry
            },
        };
        info!(
            action = %entry.action,
            queue = ?entry.queue,
            job_id = ?entry.job_id,
            success = entry.success,
            detail = %entry.detail,
            "control action"
        );
        self.ctx.audit.record(entry);
        result
    }

    /// Per-queue counts, sorted by name.
    #[must_use]
    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.ctx.queues.get_all_queue_stats()
    }

    /// Apply a queue action.
    ///
    /// # Errors
    ///
    /// `UnknownQueue`, `UnknownJob`, or `InvalidConfig` when `cancel_job`
    /// lacks a job id.
    pub fn queue_control(
        &self,
        request: &QueueControlRequest,
        actor: Option<String>,
    ) -> Result<ControlResponse, SchedulerError> {
        let queues = &self.ctx.queues;
        let queue = request.queue_name.as_str();
        let mut entry = AuditEntry::new(request.action.name(), false, "")
            .with_queue(queue)
            .with_actor(actor);
        if let Some(job_id) = &request.job_id {
            entry = entry.with_job(job_id.clone());
        }

        let result = match request.action {
            QueueAction::Pause => queues.pause_queue(queue).map(|()| ControlResponse {
                message: format!("queue {queue} paused"),
                success: true,
                ..ControlResponse::default()
            }),
            QueueAction::Resume => queues.resume_queue(queue).map(|()| ControlResponse {
                message: format!("queue {queue} resumed"),
                success: true,
                ..ControlResponse::default()
            }),
            QueueAction::Clear => queues.clear_queue(queue).map(|cleared| ControlResponse {
                message: format!("cleared {cleared} jobs from {queue}"),
                success: true,
                cleared: Some(cleared),
                ..ControlResponse::default()
            }),
            QueueAction::CancelJob => match request.job_id.as_deref() {
                None => Err(SchedulerError::InvalidConfig(
                    "jobId is required for cancel_job".into(),
                )),
                Some(job_id) => queues.cancel_job(queue, job_id).map(|cancelled| ControlResponse {
                    message: if cancelled {
                        format!("job {job_id} cancelled")
                    } else {
                        format!("job {job_id} already finished")
                    },
                    success: cancelled,
                    ..ControlResponse::default()
                }),
            },
            QueueAction::GetStats => queues.get_queue_stats(queue).map(|stats| ControlResponse {
                message: format!("stats for {queue}"),
                success: true,
                stats: Some(stats),
                ..ControlResponse::default()
            }),
        };
        self.audit(entry, result, |r| r.message.clone())
    }

    /// Configuration of every queue.
    #[must_use]
    pub fn queue_configs(&self) -> BTreeMap<String, QueueConfig> {
        self.ctx.queues.configs()
    }

    /// Apply a configuration patch to one queue.
    ///
    /// # Errors
    ///
    /// `UnknownQueue` or `InvalidConfig`; nothing changes on error.
    pub fn update_config(
        &self,
        request: &ConfigUpdateRequest,
        actor: Option<String>,
    ) -> Result<ConfigUpdateResponse, SchedulerError> {
        let queue = request.queue_name.as_str();
        let entry = AuditEntry::new("update_config", false, "")
            .with_queue(queue)
            .with_actor(actor);
        let result = self
            .ctx
            .queues
            .update_config(queue, &request.config)
            .map(|config| ConfigUpdateResponse {
                message: format!("configuration of {queue} updated"),
                success: true,
                config,
            });
        self.audit(entry, result, |r| format!("{:?}", r.config))
    }

    /// Fresh memory sample with attribution and alert history.
    ///
    /// # Errors
    ///
    /// Propagates memory source failures.
    pub fn memory_overview(&self) -> Result<MemoryOverview, SchedulerError> {
        let memory = &self.ctx.memory;
        let memory_stats = memory.get_memory_stats()?;
        let queue_memory_breakdown = memory.get_queue_memory_breakdown()?;
        Ok(MemoryOverview {
            memory_stats,
            queue_memory_breakdown,
            timestamp: now_ms(),
            alerts: memory.alerts(),
            throttled_queues: memory.throttled_queues(),
            monitoring: memory.is_monitoring(),
        })
    }

    /// Apply a memory action.
    ///
    /// # Errors
    ///
    /// Propagates memory source failures.
    pub fn memory_control(
        &self,
        request: &MemoryControlRequest,
        actor: Option<String>,
    ) -> Result<MemoryControlResponse, SchedulerError> {
        let memory = &self.ctx.memory;
        let entry = AuditEntry::new(request.action.name(), false, "").with_actor(actor);
        let result = match request.action {
            MemoryAction::CheckMemory => memory.check_memory_and_take_action().map(|acted| {
                MemoryControlResponse {
                    message: if acted {
                        "memory critical, admissions throttled".into()
                    } else {
                        "no action taken".into()
                    },
                    success: true,
                    action_taken: Some(acted),
                    memory_stats: memory.last_stats(),
                    ..MemoryControlResponse::default()
                }
            }),
            MemoryAction::GetBreakdown => {
                memory
                    .get_queue_memory_breakdown()
                    .map(|breakdown| MemoryControlResponse {
                        message: "queue memory breakdown".into(),
                        success: true,
                        queue_memory_breakdown: Some(breakdown),
                        ..MemoryControlResponse::default()
                    })
            }
            MemoryAction::StartMonitoring => {
                let interval_ms = request
                    .interval_ms
                    .unwrap_or(self.ctx.config.memory.sample_interval_ms);
                let started = memory.start_memory_monitoring(interval_ms);
                Ok(MemoryControlResponse {
                    message: if started {
                        format!("memory monitoring started every {interval_ms} ms")
                    } else {
                        "memory monitoring already running".into()
                    },
                    success: true,
                    ..MemoryControlResponse::default()
                })
            }
            MemoryAction::StopMonitoring => {
                let stopped = memory.stop_memory_monitoring();
                Ok(MemoryControlResponse {
                    message: if stopped {
                        "memory monitoring stopped".into()
                    } else {
                        "memory monitoring was not running".into()
                    },
                    success: true,
                    ..MemoryControlResponse::default()
                })
            }
        };
        self.audit(entry, result, |r| r.message.clone())
    }

    /// Derived performance metrics for every queue.
    #[must_use]
    pub fn performance(&self) -> PerformanceReport {
        let queues = &self.ctx.queues;
        build_report(&queues.get_all_queue_stats(), queues.started_at_ms(), now_ms())
    }
}
