//! Per-queue configuration and its admin-facing patch form.

use serde::{Deserialize, Serialize};

/// Configuration for one named queue.
///
/// This is also the wire shape accepted by the admin control plane, so it
/// recognizes exactly the fields below and rejects anything else. Durations
/// are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueConfig {
    /// Number of workers serving the queue.
    pub max_workers: u32,
    /// Maximum number of waiting jobs before admission is refused.
    pub max_queue_size: usize,
    /// Jobs each worker may run at once.
    pub concurrency: u32,
    /// Pause before each job starts, in milliseconds.
    pub delay_between_jobs: u64,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Backoff between retries, in milliseconds.
    pub retry_delay: u64,
    /// Whether the queue admits and dispatches jobs.
    pub is_active: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: u32::try_from(num_cpus::get().clamp(1, 4)).unwrap_or(1),
            max_queue_size: 100,
            concurrency: 1,
            delay_between_jobs: 0,
            retry_attempts: 3,
            retry_delay: 5_000,
            is_active: true,
        }
    }
}

impl QueueConfig {
    /// Maximum number of concurrently active jobs (`maxWorkers × concurrency`).
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.max_workers as usize).saturating_mul(self.concurrency as usize)
    }

    /// Validate queue configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("maxWorkers must be greater than 0".into());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if self.max_queue_size == 0 {
            return Err("maxQueueSize must be greater than 0".into());
        }
        Ok(())
    }
}

/// Partial queue configuration submitted through `PUT /queues/config`.
///
/// Absent fields keep their current value; unknown fields fail to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueConfigPatch {
    /// New worker count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<u32>,
    /// New waiting-job ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    /// New per-worker concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// New pre-job delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_between_jobs: Option<u64>,
    /// New retry count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// New retry backoff in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// New active flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl QueueConfigPatch {
    /// Overlay this patch onto `base`, returning the merged configuration.
    #[must_use]
    pub fn apply(&self, base: &QueueConfig) -> QueueConfig {
        QueueConfig {
            max_workers: self.max_workers.unwrap_or(base.max_workers),
            max_queue_size: self.max_queue_size.unwrap_or(base.max_queue_size),
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            delay_between_jobs: self.delay_between_jobs.unwrap_or(base.delay_between_jobs),
            retry_attempts: self.retry_attempts.unwrap_or(base.retry_attempts),
            retry_delay: self.retry_delay.unwrap_or(base.retry_delay),
            is_active: self.is_active.unwrap_or(base.is_active),
        }
    }
}
