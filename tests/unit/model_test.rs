//! Tests for mirror definitions and run records

use chrono::{Duration, Utc};

use mirror_scheduler::core::{
    Author, Change, CronSchedule, MirrorConfig, MirrorDirection, MirrorResult, MirrorStatus,
    Revision, WorkItem,
};

fn mirror() -> MirrorConfig {
    MirrorConfig::new(
        "nightly",
        "proj",
        "repo",
        CronSchedule::parse("0 0 3 * * *").expect("valid cron"),
        MirrorDirection::RemoteToLocal,
        "file:///srv/remote",
    )
}

#[test]
fn test_mirror_key_is_project_qualified() {
    assert_eq!(mirror().key(), "proj/nightly");
}

#[test]
fn test_mirror_config_serde() {
    let original = mirror().with_local_path("/imported").with_caps(10, 1_000);
    let json = serde_json::to_string(&original).expect("Failed to serialize");
    assert!(json.contains("\"0 0 3 * * *\""));
    assert!(json.contains("REMOTE_TO_LOCAL"));

    let parsed: MirrorConfig = serde_json::from_str(&json).expect("Failed to deserialize");
    assert_eq!(parsed, original);
}

#[test]
fn test_work_items_get_distinct_run_ids() {
    let now = Utc::now();
    let a = WorkItem::new(mirror(), now);
    let b = WorkItem::new(mirror(), now);
    assert_ne!(a.run_id, b.run_id);
}

#[test]
fn test_result_completion_never_precedes_trigger() {
    let now = Utc::now();
    let item = WorkItem::new(mirror(), now);
    let result = MirrorResult::new(&item, MirrorStatus::UpToDate, None, None, now - Duration::seconds(5));
    assert_eq!(result.completed_at, result.triggered_at);
    assert_eq!(result.elapsed(), std::time::Duration::ZERO);
    assert_eq!(result.mirror, "proj/nightly");
}

#[test]
fn test_status_labels() {
    assert_eq!(MirrorStatus::Success.to_string(), "success");
    assert_eq!(MirrorStatus::UpToDate.to_string(), "up_to_date");
    assert_eq!(
        serde_json::to_string(&MirrorStatus::UpToDate).expect("Failed to serialize"),
        "\"UP_TO_DATE\""
    );
}

#[test]
fn test_mirror_author_and_revisions() {
    let author = Author::for_mirror(&mirror());
    assert_eq!(author.name, "Mirror nightly");
    assert!(Revision::HEAD.is_relative());
    assert!(!Revision::INIT.is_relative());
    assert_eq!(Change::Remove { path: "/a".into() }.path(), "/a");
}
