//! Tests for the result sink and Prometheus metrics

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mirror_scheduler::core::{
    CronSchedule, InMemoryAuditSink, PrometheusMetrics, MetricsSink, MirrorConfig, MirrorDirection,
    MirrorError, MirrorPhase, MirrorResult, MirrorStatus, ResultSink, SkipReason, WorkItem,
};

fn item() -> WorkItem {
    let mirror = MirrorConfig::new(
        "m",
        "p",
        "r",
        CronSchedule::parse("* * * * * *").expect("valid cron"),
        MirrorDirection::RemoteToLocal,
        "file:///remote",
    );
    WorkItem::new(mirror, Utc::now())
}

#[test]
fn test_metrics_are_keyed_by_mirror_and_status() {
    let metrics = PrometheusMetrics::new().expect("Failed to create metrics");
    metrics.record_result("p/a", MirrorStatus::Success, Duration::from_millis(10));
    metrics.record_result("p/a", MirrorStatus::Error, Duration::from_millis(10));
    metrics.record_result("p/b", MirrorStatus::Success, Duration::from_millis(10));

    assert_eq!(metrics.count("p/a", MirrorStatus::Success), 1);
    assert_eq!(metrics.runs("p/a"), 2);
    assert_eq!(metrics.runs("p/c"), 0);
    assert!(metrics.durations("p/b", MirrorStatus::Error).is_none());
    let (samples, sum) = metrics
        .durations("p/a", MirrorStatus::Success)
        .expect("Failed to find duration series");
    assert_eq!(samples, 1);
    assert!((sum - 0.01).abs() < 1e-9);
}

#[test]
fn test_result_sink_records_results_and_audit() {
    let metrics = Arc::new(PrometheusMetrics::new().expect("Failed to create metrics"));
    let audit = Arc::new(InMemoryAuditSink::new(16));
    let sink = ResultSink::new(metrics.clone()).with_audit(audit.clone());

    let item = item();
    sink.record_result(&MirrorResult::failed(
        &item,
        &MirrorError::RemoteAccess("unreachable".into()),
        Utc::now(),
    ));

    assert_eq!(metrics.count("p/m", MirrorStatus::Error), 1);
    assert_eq!(audit.count("p/m", MirrorPhase::Completed(MirrorStatus::Error)), 1);
}

#[test]
fn test_result_sink_counts_skips_and_enumeration_failures() {
    let metrics = Arc::new(PrometheusMetrics::new().expect("Failed to create metrics"));
    let audit = Arc::new(InMemoryAuditSink::new(16));
    let sink = ResultSink::new(metrics.clone()).with_audit(audit.clone());

    sink.record_skip("p/m", SkipReason::Outstanding, None);
    sink.record_skip("p/m", SkipReason::Outstanding, None);
    sink.record_enumeration_failure(
        "broken",
        &MirrorError::ConfigEnumeration {
            project: "broken".into(),
            reason: "corrupt".into(),
        },
    );

    assert_eq!(metrics.skips("p/m", SkipReason::Outstanding), 2);
    assert_eq!(metrics.skips("p/m", SkipReason::AccessDenied), 0);
    assert_eq!(metrics.enumeration_failures("broken"), 1);
    assert_eq!(
        audit.count("p/m", MirrorPhase::Skipped(SkipReason::Outstanding)),
        2
    );
}

#[test]
fn test_result_sink_without_audit() {
    let metrics = Arc::new(PrometheusMetrics::new().expect("Failed to create metrics"));
    let sink = ResultSink::new(metrics.clone());
    sink.record_phase("p/m", None, MirrorPhase::Due);
    sink.record_skip("p/m", SkipReason::Shutdown, Some("stopping".into()));
    assert_eq!(metrics.skips("p/m", SkipReason::Shutdown), 1);
}
