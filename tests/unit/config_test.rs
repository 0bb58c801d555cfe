//! Tests for configuration validation and loading

use mirror_scheduler::config::{
    AccessFailurePolicy, ExecutionPoolConfig, OverlapPolicy, SchedulingConfig,
};

#[test]
fn test_scheduling_config_defaults() {
    let cfg = SchedulingConfig::default();
    assert!(cfg.worker_count >= 1);
    assert_eq!(cfg.tick_interval_ms, 1_000);
    assert_eq!(cfg.access_failure, AccessFailurePolicy::FailClosed);
    assert_eq!(cfg.overlap, OverlapPolicy::CatchUp);
    assert_eq!(cfg.outstanding_limit(), None);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_scheduling_config_invalid_worker_count() {
    let cfg = SchedulingConfig::new().with_worker_count(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduling_config_invalid_caps() {
    assert!(SchedulingConfig::new().with_default_caps(0, 1).validate().is_err());
    assert!(SchedulingConfig::new().with_default_caps(1, 0).validate().is_err());
}

#[test]
fn test_scheduling_config_invalid_optional_limits() {
    assert!(SchedulingConfig::new()
        .with_access_timeout_ms(Some(0))
        .validate()
        .is_err());
    assert!(SchedulingConfig::new()
        .with_max_outstanding_per_mirror(Some(0))
        .validate()
        .is_err());
}

#[test]
fn test_scheduling_config_from_json() {
    let cfg = SchedulingConfig::from_json_str(
        r#"{
            "worker_count": 3,
            "access_failure": "fail_open",
            "access_timeout_ms": 250,
            "overlap": "skip_if_running"
        }"#,
    )
    .expect("Failed to parse config");

    assert_eq!(cfg.worker_count, 3);
    assert!(cfg.access_failure.allows());
    assert_eq!(cfg.access_timeout().map(|t| t.as_millis()), Some(250));
    assert_eq!(cfg.outstanding_limit(), Some(1));
    // Unspecified fields keep their defaults.
    assert_eq!(cfg.tick_interval_ms, 1_000);
}

#[test]
fn test_scheduling_config_from_json_rejects_invalid() {
    assert!(SchedulingConfig::from_json_str(r#"{"tick_interval_ms": 10}"#).is_err());
    assert!(SchedulingConfig::from_json_str(r#"{"overlap": "sometimes"}"#).is_err());
    assert!(SchedulingConfig::from_json_str("not json").is_err());
}

#[test]
fn test_pool_config_follows_scheduling_config() {
    let scheduling = SchedulingConfig::new().with_worker_count(7);
    let pool = ExecutionPoolConfig::from_scheduling(&scheduling);
    assert_eq!(pool.worker_count, 7);
    assert_eq!(pool.thread_stack_size, scheduling.thread_stack_size);
    assert!(pool.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_stack_size() {
    let pool = ExecutionPoolConfig::new().with_thread_stack_size(1_024);
    assert!(pool.validate().is_err());
}
