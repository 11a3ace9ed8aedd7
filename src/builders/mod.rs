//! Builders to construct the scheduler context from configuration.

pub mod context;

pub use context::{SchedulerContext, SchedulerContextBuilder};
