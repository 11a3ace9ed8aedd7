//! Tests for configuration validation

use crawl_admission::config::{QueueConfig, QueueConfigPatch, SchedulerConfig, CURRENT_CRAWLS};
use crawl_admission::util::Priority;

fn queue(max_workers: u32, concurrency: u32, max_queue_size: usize) -> QueueConfig {
    QueueConfig {
        max_workers,
        max_queue_size,
        concurrency,
        delay_between_jobs: 0,
        retry_attempts: 2,
        retry_delay: 1_000,
        is_active: true,
    }
}

#[test]
fn test_queue_config_validation() {
    assert!(queue(2, 2, 50).validate().is_ok());
    assert!(queue(0, 2, 50).validate().is_err());
    assert!(queue(2, 0, 50).validate().is_err());
    assert!(queue(2, 2, 0).validate().is_err());
}

#[test]
fn test_queue_config_wire_format() {
    let json = serde_json::to_value(queue(3, 2, 100)).unwrap();
    assert_eq!(json["maxWorkers"], 3);
    assert_eq!(json["maxQueueSize"], 100);
    assert_eq!(json["delayBetweenJobs"], 0);
    assert_eq!(json["isActive"], true);
}

#[test]
fn test_queue_config_rejects_unknown_fields() {
    let json = r#"{"maxWorkers": 1, "maxQueueSize": 1, "concurrency": 1,
        "delayBetweenJobs": 0, "retryAttempts": 0, "retryDelay": 0,
        "isActive": true, "turbo": true}"#;
    assert!(serde_json::from_str::<QueueConfig>(json).is_err());
}

#[test]
fn test_empty_patch_changes_nothing() {
    let base = queue(3, 2, 100);
    assert_eq!(QueueConfigPatch::default().apply(&base), base);
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "queues": {
            "web-scraping": {"maxWorkers": 1, "maxQueueSize": 5, "concurrency": 1,
                "delayBetweenJobs": 0, "retryAttempts": 0, "retryDelay": 0, "isActive": true}
        }
    }"#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.queues["web-scraping"].max_queue_size, 5);
    assert_eq!(cfg.default_plan, "free");
    assert_eq!(cfg.plans["pro"].priority, Priority::Mid);
    assert_eq!(cfg.queue_counters["web-scraping"], CURRENT_CRAWLS);
    assert_eq!(cfg.scheduling.starvation_window, 10);
}

#[test]
fn test_scheduler_config_rejects_bad_cross_references() {
    let json = r#"{
        "queues": {
            "content-analysis": {"maxWorkers": 1, "maxQueueSize": 5, "concurrency": 1,
                "delayBetweenJobs": 0, "retryAttempts": 0, "retryDelay": 0, "isActive": true}
        }
    }"#;
    // The default counter map names `web-scraping`, which is missing here.
    let err = SchedulerConfig::from_json_str(json).unwrap_err();
    assert!(err.contains("web-scraping"));

    assert!(SchedulerConfig::from_json_str("{").unwrap_err().starts_with("parse error"));
}

#[test]
fn test_rate_limit_burst_longer_than_window_invalid() {
    let mut cfg = SchedulerConfig::default();
    cfg.rate_limit.limits.burst_window_ms = cfg.rate_limit.limits.window_ms + 1;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_starvation_window_invalid() {
    let mut cfg = SchedulerConfig::default();
    cfg.scheduling.starvation_window = 0;
    assert!(cfg.validate().is_err());
}
