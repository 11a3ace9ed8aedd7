//! Derived queue metrics and advisory tuning recommendations.
//!
//! Recommendations are text for operators; nothing here changes
//! configuration.

use serde::{Deserialize, Serialize};

use crate::core::queue_manager::QueueStats;

const HIGH_ERROR_RATE: f64 = 0.10;
const LOW_UTILIZATION: f64 = 0.20;
const NEAR_FULL: f64 = 0.80;

/// Slot usage of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityAnalysis {
    /// `maxWorkers × concurrency`.
    pub capacity: usize,
    /// Active jobs.
    pub active: usize,
    /// Waiting jobs.
    pub waiting: usize,
    /// Free slots.
    pub headroom: usize,
    /// Whether every slot is taken.
    pub saturated: bool,
}

/// Metrics for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePerformance {
    /// Queue name.
    pub queue_name: String,
    /// `completed / (completed + failed)`.
    pub success_rate: f64,
    /// `failed / (completed + failed)`.
    pub error_rate: f64,
    /// `active / capacity`.
    pub utilization_rate: f64,
    /// Completed jobs per minute since start.
    pub throughput_per_minute: f64,
    /// Slot usage.
    pub capacity: CapacityAnalysis,
    /// Advisory tuning hints.
    pub recommendations: Vec<String>,
}

/// Report served by `GET /queues/performance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Report time, epoch milliseconds.
    pub generated_at_ms: u64,
    /// Time since the queues were created.
    pub uptime_ms: u64,
    /// Per-queue metrics, sorted by name.
    pub queues: Vec<QueuePerformance>,
    /// All recommendations, prefixed with their queue.
    pub recommendations: Vec<String>,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Derive metrics for one queue.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn analyze_queue(stats: &QueueStats, uptime_ms: u64) -> QueuePerformance {
    let finished = stats.completed + stats.failed;
    let success_rate = ratio(stats.completed, finished);
    let error_rate = ratio(stats.failed, finished);
    let utilization_rate = ratio(stats.active as u64, stats.capacity as u64);
    let minutes = (uptime_ms.max(1_000) as f64) / 60_000.0;
    let throughput_per_minute = stats.completed as f64 / minutes;

    let headroom = stats.capacity.saturating_sub(stats.active);
    let capacity = CapacityAnalysis {
        capacity: stats.capacity,
        active: stats.active,
        waiting: stats.waiting,
        headroom,
        saturated: headroom == 0,
    };

    let mut recommendations = Vec::new();
    if !stats.is_active {
        recommendations.push("queue is paused; resume it to drain waiting jobs".to_string());
    }
    if stats.throttled {
        recommendations.push(
            "admissions are throttled by memory pressure; reduce payload sizes or add memory"
                .to_string(),
        );
    }
    if finished > 0 && error_rate > HIGH_ERROR_RATE {
        recommendations.push(format!(
            "error rate is {:.1}%; inspect job errors and consider a longer retryDelay",
            error_rate * 100.0
        ));
    }
    if capacity.saturated && stats.waiting > stats.capacity {
        recommendations.push(format!(
            "{} jobs waiting on {} saturated slots; raise maxWorkers or concurrency",
            stats.waiting, stats.capacity
        ));
    }
    if stats.max_queue_size > 0
        && ratio(stats.waiting as u64, stats.max_queue_size as u64) >= NEAR_FULL
    {
        recommendations.push(format!(
            "waiting jobs at {}/{} of maxQueueSize; new submissions will soon be rejected",
            stats.waiting, stats.max_queue_size
        ));
    }
    if stats.waiting == 0 && stats.completed > 0 && utilization_rate < LOW_UTILIZATION {
        recommendations.push("capacity is mostly idle; maxWorkers could be lowered".to_string());
    }

    QueuePerformance {
        queue_name: stats.queue_name.clone(),
        success_rate,
        error_rate,
        utilization_rate,
        throughput_per_minute,
        capacity,
        recommendations,
    }
}

/// Derive metrics for every queue.
#[must_use]
pub fn build_report(stats: &[QueueStats], started_at_ms: u64, now_ms: u64) -> PerformanceReport {
    let uptime_ms = now_ms.saturating_sub(started_at_ms);
    let queues: Vec<QueuePerformance> = stats.iter().map(|s| analyze_queue(s, uptime_ms)).collect();
    let recommendations = queues
        .iter()
        .flat_map(|q| {
            q.recommendations
                .iter()
                .map(move |r| format!("{}: {r}", q.queue_name))
        })
        .collect();
    PerformanceReport {
        generated_at_ms: now_ms,
        uptime_ms,
        queues,
        recommendations,
    }
}
