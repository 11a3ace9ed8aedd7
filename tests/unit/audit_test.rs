//! Tests for audit sink

use crawl_admission::core::{AuditEntry, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let entry = AuditEntry::new("pause", true, "queue web-scraping paused")
        .with_queue("web-scraping")
        .with_actor(Some("ops-1".to_string()));
    sink.record(entry);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "pause");
    assert_eq!(entries[0].queue.as_deref(), Some("web-scraping"));
    assert_eq!(entries[0].actor.as_deref(), Some("ops-1"));
    assert!(entries[0].job_id.is_none());
    assert!(entries[0].success);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(AuditEntry::new("pause", true, "first"));
    sink.record(AuditEntry::new("resume", true, "second"));
    sink.record(AuditEntry::new("clear", true, "third"));

    let entries = sink.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].detail, "second"); // First one popped
    assert_eq!(entries[1].detail, "third");
}

#[test]
fn test_audit_entry_identity() {
    let a = AuditEntry::new("cancel_job", false, "unknown job: j-1").with_job("j-1");
    let b = AuditEntry::new("cancel_job", false, "unknown job: j-1").with_job("j-1");
    assert_ne!(a.event_id, b.event_id);
    assert_eq!(a.job_id.as_deref(), Some("j-1"));
    assert!(a.created_at_ms > 0);

    let json = serde_json::to_value(&a).unwrap();
    assert_eq!(json["jobId"], "j-1");
    assert_eq!(json["success"], false);
}
