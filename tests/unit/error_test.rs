//! Tests for error types

use mirror_scheduler::core::{CapKind, MirrorError, PoolError};

#[test]
fn test_access_denied_error() {
    let err = MirrorError::AccessDenied("https://example.com/repo.git".into());
    assert_eq!(
        err.to_string(),
        "access to 'https://example.com/repo.git' is not allowed"
    );
    assert!(!err.is_fault());
}

#[test]
fn test_config_enumeration_error() {
    let err = MirrorError::ConfigEnumeration {
        project: "proj".into(),
        reason: "corrupt".into(),
    };
    assert_eq!(
        err.to_string(),
        "failed to enumerate mirrors of project 'proj': corrupt"
    );
    assert!(err.is_fault());
}

#[test]
fn test_byte_cap_error() {
    let err = MirrorError::ResourceCapExceeded {
        kind: CapKind::Bytes,
        limit: 1_024,
    };
    assert_eq!(err.to_string(), "mirror exceeded the maximum number of bytes (1024)");
}

#[test]
fn test_cancelled_and_shutdown_errors() {
    assert_eq!(MirrorError::Cancelled.to_string(), "mirror run cancelled");
    assert_eq!(
        MirrorError::PoolShutdown.to_string(),
        "execution pool has been shut down"
    );
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: MirrorError = io.into();
    assert!(matches!(err, MirrorError::Io(_)));
    assert!(err.to_string().contains("gone"));
}

#[test]
fn test_pool_error_conversion() {
    let err: MirrorError = PoolError::InvalidConfig("worker_count".into()).into();
    assert!(matches!(err, MirrorError::InvalidConfig(msg) if msg == "worker_count"));
}
