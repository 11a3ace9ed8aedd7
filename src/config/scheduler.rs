//! Root scheduler configuration: queues, rate limits, memory thresholds,
//! scheduling policy and plan tiers.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::util::serde::Priority;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "CRAWL_ADMISSION_CONFIG";

/// Window and burst ceilings for one rate-limited key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLimits {
    /// Main window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per main window.
    pub max_requests: u32,
    /// Burst sub-window length in milliseconds.
    pub burst_window_ms: u64,
    /// Requests admitted per burst window.
    pub burst_max: u32,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            burst_window_ms: 10_000,
            burst_max: 20,
        }
    }
}

impl WindowLimits {
    fn validate(&self) -> Result<(), String> {
        if self.window_ms == 0 || self.burst_window_ms == 0 {
            return Err("rate limit windows must be greater than 0".into());
        }
        if self.burst_window_ms > self.window_ms {
            return Err("burst window must not exceed the main window".into());
        }
        if self.max_requests == 0 || self.burst_max == 0 {
            return Err("rate limit ceilings must be greater than 0".into());
        }
        Ok(())
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Limits applied to routes without an override.
    #[serde(default)]
    pub limits: WindowLimits,
    /// Per-route overrides.
    #[serde(default)]
    pub routes: HashMap<String, WindowLimits>,
    /// Interval of the expired-window sweep, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

const fn default_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limits: WindowLimits::default(),
            routes: HashMap::new(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Limits that apply to `route`.
    #[must_use]
    pub fn limits_for(&self, route: &str) -> WindowLimits {
        self.routes.get(route).copied().unwrap_or(self.limits)
    }
}

/// Memory monitor thresholds, expressed as fractions of the total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Usage ratio at which pressure becomes `warning`.
    pub warning_threshold: f64,
    /// Usage ratio at which pressure becomes `critical`.
    pub critical_threshold: f64,
    /// Memory budget in bytes; the host total is used when absent.
    #[serde(default)]
    pub limit_bytes: Option<u64>,
    /// Default sampling interval in milliseconds.
    pub sample_interval_ms: u64,
    /// Number of pressure alerts kept for the dashboard.
    pub alert_history: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.75,
            critical_threshold: 0.90,
            limit_bytes: None,
            sample_interval_ms: 30_000,
            alert_history: 50,
        }
    }
}

/// Scheduling policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Dispatch cycles after which waiting lowest-tier work is forced through.
    pub starvation_window: u32,
    /// How long terminal jobs stay inspectable, in milliseconds.
    pub job_retention_ms: u64,
    /// Upper bound on archived terminal jobs per queue.
    pub max_archived_jobs: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            starvation_window: 10,
            job_retention_ms: 3_600_000,
            max_archived_jobs: 1_000,
        }
    }
}

/// A subscription plan: its priority tier and counter ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Tier attached to every job of a tenant on this plan.
    pub priority: Priority,
    /// Ceilings keyed by counter name (e.g. `currentCrawls`).
    pub limits: HashMap<String, u64>,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of queue name to configuration.
    pub queues: HashMap<String, QueueConfig>,
    /// Rate limiter settings.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Memory monitor settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Scheduling policy settings.
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    /// Subscription plans keyed by plan name.
    #[serde(default = "default_plans")]
    pub plans: HashMap<String, PlanConfig>,
    /// Plan assumed for tenants without a recorded subscription.
    #[serde(default = "default_plan_name")]
    pub default_plan: String,
    /// Tenant counter consumed by each queue's jobs.
    #[serde(default = "default_queue_counters")]
    pub queue_counters: HashMap<String, String>,
}

/// Counter tracking crawls in flight per tenant.
pub const CURRENT_CRAWLS: &str = "currentCrawls";
/// Counter tracking projects per tenant.
pub const CURRENT_PROJECTS: &str = "currentProjects";

fn default_plan_name() -> String {
    "free".into()
}

fn plan(priority: Priority, crawls: u64, projects: u64) -> PlanConfig {
    PlanConfig {
        priority,
        limits: HashMap::from([
            (CURRENT_CRAWLS.to_string(), crawls),
            (CURRENT_PROJECTS.to_string(), projects),
        ]),
    }
}

fn default_plans() -> HashMap<String, PlanConfig> {
    HashMap::from([
        ("free".to_string(), plan(Priority::Free, 1, 1)),
        ("pro".to_string(), plan(Priority::Mid, 5, 10)),
        ("agency".to_string(), plan(Priority::Top, 20, 50)),
    ])
}

fn default_queue_counters() -> HashMap<String, String> {
    HashMap::from([("web-scraping".to_string(), CURRENT_CRAWLS.to_string())])
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let queues = HashMap::from([
            (
                "web-scraping".to_string(),
                QueueConfig {
                    max_workers: 3,
                    max_queue_size: 100,
                    concurrency: 2,
                    delay_between_jobs: 1_000,
                    retry_attempts: 3,
                    retry_delay: 5_000,
                    is_active: true,
                },
            ),
            (
                "image-extraction".to_string(),
                QueueConfig {
                    max_workers: 2,
                    max_queue_size: 200,
                    concurrency: 3,
                    delay_between_jobs: 500,
                    retry_attempts: 2,
                    retry_delay: 3_000,
                    is_active: true,
                },
            ),
            (
                "content-analysis".to_string(),
                QueueConfig {
                    max_workers: 2,
                    max_queue_size: 150,
                    concurrency: 2,
                    delay_between_jobs: 0,
                    retry_attempts: 2,
                    retry_delay: 2_000,
                    is_active: true,
                },
            ),
        ]);
        Self {
            queues,
            rate_limit: RateLimitConfig::default(),
            memory: MemoryConfig::default(),
            scheduling: SchedulingConfig::default(),
            plans: default_plans(),
            default_plan: default_plan_name(),
            queue_counters: default_queue_counters(),
        }
    }
}

impl SchedulerConfig {
    /// Validate every section and cross-references between them.
    pub fn validate(&self) -> Result<(), String> {
        if self.queues.is_empty() {
            return Err("at least one queue must be defined".into());
        }
        for (name, queue) in &self.queues {
            queue
                .validate()
                .map_err(|e| format!("queue `{name}` invalid: {e}"))?;
        }

        self.rate_limit.limits.validate()?;
        for (route, limits) in &self.rate_limit.routes {
            limits
                .validate()
                .map_err(|e| format!("route `{route}` invalid: {e}"))?;
        }
        if self.rate_limit.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".into());
        }

        let mem = &self.memory;
        if !(mem.warning_threshold > 0.0
            && mem.warning_threshold < mem.critical_threshold
            && mem.critical_threshold <= 1.0)
        {
            return Err("memory thresholds must satisfy 0 < warning < critical <= 1".into());
        }
        if mem.sample_interval_ms == 0 {
            return Err("sample_interval_ms must be greater than 0".into());
        }

        if self.scheduling.starvation_window == 0 {
            return Err("starvation_window must be greater than 0".into());
        }

        if !self.plans.contains_key(&self.default_plan) {
            return Err(format!("default plan `{}` is not defined", self.default_plan));
        }
        for queue in self.queue_counters.keys() {
            if !self.queues.contains_key(queue) {
                return Err(format!("queue_counters references unknown queue `{queue}`"));
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Load configuration from the environment.
    ///
    /// A `.env` file is honoured if present. When [`CONFIG_PATH_ENV`] is set
    /// the named file is loaded, otherwise the built-in defaults are used.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_json_file(&path).map_err(anyhow::Error::msg),
            Err(_) => {
                let cfg = Self::default();
                cfg.validate().map_err(anyhow::Error::msg)?;
                Ok(cfg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.queues.len(), 3);
        assert_eq!(cfg.plans["agency"].priority, Priority::Top);
    }

    #[test]
    fn test_route_override() {
        let mut cfg = RateLimitConfig::default();
        let strict = WindowLimits {
            window_ms: 60_000,
            max_requests: 5,
            burst_window_ms: 10_000,
            burst_max: 3,
        };
        cfg.routes.insert("/crawl".into(), strict);
        assert_eq!(cfg.limits_for("/crawl"), strict);
        assert_eq!(cfg.limits_for("/other"), WindowLimits::default());
    }

    #[test]
    fn test_inverted_memory_thresholds_invalid() {
        let mut cfg = SchedulerConfig::default();
        cfg.memory.warning_threshold = 0.95;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_default_plan_invalid() {
        let mut cfg = SchedulerConfig::default();
        cfg.default_plan = "platinum".into();
        assert!(cfg.validate().is_err());
    }
}
