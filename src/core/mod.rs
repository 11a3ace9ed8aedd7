//! Core scheduling abstractions: jobs, queues, priority policy, admission
//! control and memory backpressure.

pub mod audit;
pub mod error;
pub mod executor;
pub mod job;
pub mod ledger;
pub mod memory;
pub mod performance;
pub mod queue_manager;
pub mod rate_limiter;
pub mod scheduler;
pub mod signal;
pub mod spawn;

pub use audit::{AuditEntry, AuditSink, InMemoryAuditSink};
pub use error::{AdmissionReason, AppResult, InactiveCause, SchedulerError};
pub use executor::{JobContext, UnitOfWork, WorkFailure, WorkOutcome};
pub use job::{Job, JobObserver, JobPayload, JobState, TransitionEvent};
pub use ledger::{
    CounterUsage, LimitCheck, PlanDirectory, TenantLedger, TenantPlan, TenantUsage,
};
pub use memory::{
    MemoryAlert, MemoryMonitor, MemoryReading, MemorySource, MemoryStats, PressureLevel,
    QueueMemory,
};
pub use performance::{CapacityAnalysis, PerformanceReport, QueuePerformance};
pub use queue_manager::{PayloadFootprint, QueueManager, QueueStats};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use scheduler::{
    ActiveSlot, Admission, DispatchView, PriorityPolicy, PriorityScheduler, SubmitRequest,
};
pub use signal::{CriticalSection, JobSignal, SignalRequest};
pub use spawn::{BoxedTask, Spawn};
