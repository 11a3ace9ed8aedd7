//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use crawl_admission::builders::SchedulerContext;
use crawl_admission::config::SchedulerConfig;
use crawl_admission::core::{JobContext, JobSignal, SchedulerError, UnitOfWork, WorkOutcome};
use crawl_admission::infra::FixedMemorySource;

struct NoopWork;

#[async_trait]
impl UnitOfWork for NoopWork {
    async fn run(&self, _job: JobContext, _signal: JobSignal) -> WorkOutcome {
        WorkOutcome::Completed
    }
}

#[tokio::test]
async fn test_context_builds_with_defaults() {
    let ctx = SchedulerContext::builder(SchedulerConfig::default())
        .default_executor(Arc::new(NoopWork))
        .memory_source(Arc::new(FixedMemorySource::new(1, 10)))
        .build()
        .unwrap();
    assert_eq!(
        ctx.queues.queue_names(),
        vec!["content-analysis", "image-extraction", "web-scraping"]
    );
    assert!(!ctx.memory.is_monitoring());
    assert!(!ctx.limiter.is_sweeping());

    ctx.start_background_tasks();
    assert!(ctx.memory.is_monitoring());
    assert!(ctx.limiter.is_sweeping());
    ctx.stop_background_tasks();
    assert!(!ctx.memory.is_monitoring());
    assert!(!ctx.limiter.is_sweeping());
}

#[tokio::test]
async fn test_per_queue_executor_is_enough() {
    let mut config = SchedulerConfig::default();
    config.queues.retain(|name, _| name == "content-analysis");
    config.queue_counters.clear();
    let ctx = SchedulerContext::builder(config)
        .executor("content-analysis", Arc::new(NoopWork))
        .build()
        .unwrap();
    assert!(ctx.queues.has_queue("content-analysis"));
    assert!(!ctx.queues.has_queue("web-scraping"));
}

#[tokio::test]
async fn test_missing_executor_is_invalid() {
    let err = SchedulerContext::builder(SchedulerConfig::default())
        .executor("web-scraping", Arc::new(NoopWork))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let mut config = SchedulerConfig::default();
    config.memory.critical_threshold = 0.5;
    let err = SchedulerContext::builder(config)
        .default_executor(Arc::new(NoopWork))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}

#[test]
fn test_build_outside_runtime_needs_spawner() {
    let err = SchedulerContext::builder(SchedulerConfig::default())
        .default_executor(Arc::new(NoopWork))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Backend(_)));
}
