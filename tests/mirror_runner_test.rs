//! Integration tests for MirrorRunner against a directory remote and the
//! in-memory repository store.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use mirror_scheduler::config::SchedulingConfig;
use mirror_scheduler::core::{
    Change, Command, CommandExecutor, CommitResult, CronSchedule, MirrorConfig, MirrorDirection,
    MirrorError, MirrorRunner, MirrorStatus, Revision, WorkItem, MIRROR_STATE_FILE,
};
use mirror_scheduler::infra::{InMemoryRepositoryStore, LocalDirectoryTransport};

// ============================================================================
// FIXTURES
// ============================================================================

/// Command executor that counts commits before handing them to the store.
struct CountingExecutor {
    store: Arc<InMemoryRepositoryStore>,
    commits: AtomicUsize,
}

#[async_trait]
impl CommandExecutor for CountingExecutor {
    async fn execute(&self, command: Command) -> Result<CommitResult, MirrorError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.store.execute(command).await
    }
}

struct Fixture {
    remote: TempDir,
    work: TempDir,
    store: Arc<InMemoryRepositoryStore>,
    commands: CountingExecutor,
    runner: MirrorRunner,
}

impl Fixture {
    fn new() -> Self {
        let remote = tempfile::tempdir().expect("remote dir");
        let work = tempfile::tempdir().expect("work dir");
        let store = Arc::new(InMemoryRepositoryStore::new());
        store.create_repo("proj", "repo");

        let config = SchedulingConfig::new()
            .with_worker_count(1)
            .with_work_dir(work.path());
        let runner = MirrorRunner::new(Arc::new(LocalDirectoryTransport::new()), store.clone(), &config);
        let commands = CountingExecutor {
            store: Arc::clone(&store),
            commits: AtomicUsize::new(0),
        };
        Self {
            remote,
            work,
            store,
            commands,
            runner,
        }
    }

    fn write_remote(&self, path: &str, content: &str) {
        let target = self.remote.path().join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create remote parent");
        }
        fs::write(target, content).expect("write remote file");
    }

    fn mirror(&self, direction: MirrorDirection) -> MirrorConfig {
        MirrorConfig::new(
            "m1",
            "proj",
            "repo",
            CronSchedule::parse("0 * * * * *").expect("valid cron"),
            direction,
            format!("file://{}", self.remote.path().display()),
        )
    }

    async fn run(&self, mirror: MirrorConfig) -> mirror_scheduler::core::MirrorResult {
        let item = WorkItem::new(mirror, Utc::now());
        self.runner.run(&item, &self.commands).await
    }

    fn commits(&self) -> usize {
        self.commands.commits.load(Ordering::SeqCst)
    }

    fn work_areas(&self) -> usize {
        fs::read_dir(self.work.path()).expect("read work dir").count()
    }
}

fn content(snapshot: &mirror_scheduler::core::Snapshot, path: &str) -> Option<String> {
    snapshot
        .get(path)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

// ============================================================================
// REMOTE TO LOCAL
// ============================================================================

#[tokio::test]
async fn test_remote_changes_are_committed() {
    let fx = Fixture::new();
    fx.write_remote("a.json", r#"{"a":1}"#);
    fx.write_remote("sub/b.json", r#"{"b":2}"#);

    let result = fx.run(fx.mirror(MirrorDirection::RemoteToLocal)).await;
    assert_eq!(result.status, MirrorStatus::Success, "{result:?}");
    assert!(result.triggered_at <= result.completed_at);
    assert_eq!(fx.commits(), 1);

    let head = fx.store.head_files("proj", "repo");
    assert_eq!(content(&head, "/a.json").as_deref(), Some(r#"{"a":1}"#));
    assert_eq!(content(&head, "/sub/b.json").as_deref(), Some(r#"{"b":2}"#));
    assert!(head.contains_key(&format!("/{MIRROR_STATE_FILE}")));

    let history = fx.store.history("proj", "repo");
    let last = history.last().expect("commit");
    assert_eq!(last.author.name, "Mirror m1");
    assert!(last.summary.starts_with("Mirror "));
    assert!(last.summary.ends_with("to the repository 'repo'"));
    assert_eq!(fx.work_areas(), 0);
}

#[tokio::test]
async fn test_unchanged_remote_is_up_to_date() {
    let fx = Fixture::new();
    fx.write_remote("a.json", "1");
    let mirror = fx.mirror(MirrorDirection::RemoteToLocal);

    assert_eq!(fx.run(mirror.clone()).await.status, MirrorStatus::Success);
    let second = fx.run(mirror).await;
    assert_eq!(second.status, MirrorStatus::UpToDate);
    assert_eq!(fx.commits(), 1);
    assert_eq!(fx.store.commit_count("proj", "repo"), 1);
}

#[tokio::test]
async fn test_remote_removals_are_mirrored() {
    let fx = Fixture::new();
    fx.write_remote("a.json", "1");
    fx.write_remote("b.json", "2");
    let mirror = fx.mirror(MirrorDirection::RemoteToLocal);
    assert_eq!(fx.run(mirror.clone()).await.status, MirrorStatus::Success);

    fs::remove_file(fx.remote.path().join("b.json")).expect("remove");
    assert_eq!(fx.run(mirror).await.status, MirrorStatus::Success);

    let head = fx.store.head_files("proj", "repo");
    assert!(head.contains_key("/a.json"));
    assert!(!head.contains_key("/b.json"));
}

#[tokio::test]
async fn test_file_cap_yields_error_without_commit() {
    let fx = Fixture::new();
    for i in 0..3 {
        fx.write_remote(&format!("f{i}.json"), "x");
    }
    let mirror = fx.mirror(MirrorDirection::RemoteToLocal).with_caps(2, 1_024);

    let result = fx.run(mirror).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(result
        .cause
        .as_deref()
        .unwrap_or_default()
        .contains("maximum number of files"));
    assert_eq!(fx.commits(), 0);
    assert_eq!(fx.store.commit_count("proj", "repo"), 0);
    assert_eq!(fx.work_areas(), 0);
}

#[tokio::test]
async fn test_byte_cap_yields_error_without_commit() {
    let fx = Fixture::new();
    fx.write_remote("big.json", &"x".repeat(64));
    let mirror = fx.mirror(MirrorDirection::RemoteToLocal).with_caps(100, 32);

    let result = fx.run(mirror).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(result
        .cause
        .as_deref()
        .unwrap_or_default()
        .contains("maximum number of bytes"));
    assert_eq!(fx.commits(), 0);
}

/// A run capped far below the remote's size fails on the first file over the
/// cap, without reading the rest of the tree.
#[tokio::test]
async fn test_capped_run_over_large_remote_fails_fast() {
    let fx = Fixture::new();
    let blob = "x".repeat(1 << 20);
    for i in 0..64 {
        fx.write_remote(&format!("big/f{i:03}.bin"), &blob);
    }
    let mirror = fx.mirror(MirrorDirection::RemoteToLocal).with_caps(1, 1_024);

    let started = Instant::now();
    let result = fx.run(mirror).await;
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(result
        .cause
        .as_deref()
        .unwrap_or_default()
        .contains("maximum number of bytes"));
    assert_eq!(fx.commits(), 0);
    assert_eq!(fx.work_areas(), 0);
}

#[tokio::test]
async fn test_local_path_and_content_filter() {
    let fx = Fixture::new();
    fx.write_remote("keep.json", "k");
    fx.write_remote("scratch.tmp", "t");
    let mirror = fx
        .mirror(MirrorDirection::RemoteToLocal)
        .with_local_path("/mirrored")
        .with_content_filter("# temporary files\n*.tmp\n");

    assert_eq!(fx.run(mirror).await.status, MirrorStatus::Success);
    let head = fx.store.head_files("proj", "repo");
    assert!(head.contains_key("/mirrored/keep.json"));
    assert!(!head.contains_key("/mirrored/scratch.tmp"));
    assert!(head.contains_key(&format!("/mirrored/{MIRROR_STATE_FILE}")));
}

#[tokio::test]
async fn test_commit_conflict_is_error() {
    let fx = Fixture::new();
    fx.write_remote("a.json", "1");
    fx.store
        .reject_commits(Some("concurrent modification".into()));

    let result = fx.run(fx.mirror(MirrorDirection::RemoteToLocal)).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(result
        .cause
        .as_deref()
        .unwrap_or_default()
        .contains("concurrent modification"));
}

#[tokio::test]
async fn test_unreachable_remote_is_error() {
    let fx = Fixture::new();
    let mut mirror = fx.mirror(MirrorDirection::RemoteToLocal);
    mirror.remote_uri = "file:///definitely/not/a/remote".into();

    let result = fx.run(mirror).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(result.cause.as_deref().unwrap_or_default().contains("remote access failed"));
}

#[tokio::test]
async fn test_unsupported_scheme_is_error() {
    let fx = Fixture::new();
    let mut mirror = fx.mirror(MirrorDirection::RemoteToLocal);
    mirror.remote_uri = "https://example.com/repo.git".into();

    let result = fx.run(mirror).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert_eq!(fx.commits(), 0);
}

// ============================================================================
// LOCAL TO REMOTE
// ============================================================================

async fn seed_local(store: &InMemoryRepositoryStore, files: &[(&str, &str)]) {
    let changes = files
        .iter()
        .map(|(path, body)| Change::Upsert {
            path: (*path).to_string(),
            content: body.as_bytes().to_vec(),
        })
        .collect();
    store
        .execute(Command::Push {
            author: mirror_scheduler::core::Author {
                name: "Seeder".into(),
                email: "seed@localhost".into(),
            },
            project: "proj".into(),
            repo: "repo".into(),
            base_revision: Revision::HEAD,
            summary: "seed".into(),
            detail: String::new(),
            changes,
        })
        .await
        .expect("seed commit");
}

#[tokio::test]
async fn test_local_content_is_pushed() {
    let fx = Fixture::new();
    seed_local(&fx.store, &[("/a.json", "1"), ("/dir/b.json", "2")]).await;
    fx.write_remote("stale.json", "old");
    let mirror = fx.mirror(MirrorDirection::LocalToRemote);

    let result = fx.run(mirror.clone()).await;
    assert_eq!(result.status, MirrorStatus::Success, "{result:?}");
    assert_eq!(fs::read_to_string(fx.remote.path().join("a.json")).expect("a"), "1");
    assert_eq!(fs::read_to_string(fx.remote.path().join("dir/b.json")).expect("b"), "2");
    assert!(!Path::new(&fx.remote.path().join("stale.json")).exists());

    let again = fx.run(mirror).await;
    assert_eq!(again.status, MirrorStatus::UpToDate);
    assert_eq!(fx.commits(), 0);
}

#[tokio::test]
async fn test_local_to_remote_respects_caps() {
    let fx = Fixture::new();
    seed_local(&fx.store, &[("/a.json", "1"), ("/b.json", "2")]).await;
    let mirror = fx.mirror(MirrorDirection::LocalToRemote).with_caps(1, 1_024);

    let result = fx.run(mirror).await;
    assert_eq!(result.status, MirrorStatus::Error);
    assert!(!fx.remote.path().join("a.json").exists());
}
