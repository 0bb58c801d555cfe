//! Tests for the lifecycle audit trail

use mirror_scheduler::core::{
    build_audit_event, AuditSink, InMemoryAuditSink, MirrorPhase, MirrorStatus, SkipReason,
};

#[test]
fn test_audit_sink_records_events() {
    let sink = InMemoryAuditSink::new(10);
    let run_id = uuid::Uuid::new_v4();
    sink.record(build_audit_event("p/m", None, MirrorPhase::Due, None));
    sink.record(build_audit_event("p/m", Some(run_id), MirrorPhase::Queued, None));
    sink.record(build_audit_event(
        "p/m",
        Some(run_id),
        MirrorPhase::Completed(MirrorStatus::Success),
        Some("Mirror abc".into()),
    ));

    let events = sink.events_for("p/m");
    assert_eq!(events.len(), 3);
    assert!(events[0].run_id.is_none());
    assert_eq!(events[2].run_id, Some(run_id));
    assert_eq!(events[2].detail.as_deref(), Some("Mirror abc"));
}

#[test]
fn test_audit_sink_is_bounded() {
    let sink = InMemoryAuditSink::new(3);
    for _ in 0..10 {
        sink.record(build_audit_event("p/m", None, MirrorPhase::Due, None));
    }
    assert_eq!(sink.events().len(), 3);
}

#[test]
fn test_audit_event_serialization() {
    let event = build_audit_event(
        "p/m",
        None,
        MirrorPhase::Skipped(SkipReason::AccessDenied),
        None,
    );
    let json = serde_json::to_string(&event).expect("Failed to serialize");
    assert!(json.contains("access_denied"));
    assert!(json.contains("\"mirror\":\"p/m\""));
}
