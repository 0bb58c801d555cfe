//! Tests for utility functions

use mirror_scheduler::util::{init_test_tracing, now, now_ms};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_now_matches_now_ms() {
    let ms = i64::try_from(now_ms()).expect("timestamp fits in i64");
    let drift = (now().timestamp_millis() - ms).abs();
    assert!(drift < 5_000);
}

#[test]
fn test_tracing_init_is_idempotent() {
    init_test_tracing();
    init_test_tracing();
    tracing::info!(target: "mirror_scheduler", "tracing initialised twice");
}
