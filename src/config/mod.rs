//! Configuration models for queues, rate limits, memory thresholds and plans.

pub mod queue;
pub mod scheduler;

pub use queue::{QueueConfig, QueueConfigPatch};
pub use scheduler::{
    MemoryConfig, PlanConfig, RateLimitConfig, SchedulerConfig, SchedulingConfig, WindowLimits,
    CONFIG_PATH_ENV, CURRENT_CRAWLS, CURRENT_PROJECTS,
};
