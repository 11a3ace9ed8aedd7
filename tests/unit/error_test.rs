//! Tests for error types

use crawl_admission::core::{AdmissionReason, InactiveCause, JobState, SchedulerError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::AdmissionDenied(AdmissionReason::QueueFull {
        queue: "web-scraping".to_string(),
    });
    assert_eq!(format!("{}", err), "admission denied: queue full: web-scraping");
}

#[test]
fn test_queue_inactive_error() {
    let err = SchedulerError::AdmissionDenied(AdmissionReason::QueueInactive {
        queue: "image-extraction".to_string(),
        cause: InactiveCause::MemoryPressure,
    });
    assert_eq!(
        format!("{}", err),
        "admission denied: queue inactive: image-extraction is throttled by memory pressure"
    );
}

#[test]
fn test_illegal_transition_error() {
    let err = SchedulerError::IllegalTransition {
        from: JobState::Completed,
        to: JobState::Active,
    };
    assert_eq!(format!("{}", err), "illegal transition: completed -> active");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
    assert!(!err.is_operator_error());
    assert!(err.admission_reason().is_none());
}

#[test]
fn test_rate_limited_reason_wire_format() {
    let reason = AdmissionReason::RateLimited { reset_at_ms: 42_000 };
    let json = serde_json::to_value(&reason).unwrap();
    assert_eq!(json["reason"], "RateLimited");
    assert_eq!(json["resetAtMs"], 42_000);
}

#[test]
fn test_tenant_limit_reason_wire_format() {
    let reason = AdmissionReason::TenantLimitExceeded {
        tenant: "acme".into(),
        counter: "currentCrawls".into(),
        detail: "currentCrawls for tenant acme would reach 2 of 1".into(),
    };
    let json = serde_json::to_value(&reason).unwrap();
    assert_eq!(json["reason"], "TenantLimitExceeded");
    assert_eq!(json["counter"], "currentCrawls");
    let back: AdmissionReason = serde_json::from_value(json).unwrap();
    assert_eq!(back, reason);
}
