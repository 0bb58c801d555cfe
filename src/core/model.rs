//! Mirror definitions, run results and storage commands.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::schedule::CronSchedule;

/// File tree content keyed by absolute repository path (`/dir/file.json`).
pub type Snapshot = BTreeMap<String, Vec<u8>>;

/// Direction of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorDirection {
    /// Pull remote content into the local repository.
    RemoteToLocal,
    /// Push local content out to the remote repository.
    LocalToRemote,
}

/// Immutable snapshot of one mirror definition, re-read from the registry every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Mirror identifier, unique within its project.
    pub id: String,
    /// Owning project.
    pub project: String,
    /// Local repository inside the project.
    pub repo: String,
    /// Disabled mirrors are never due.
    pub enabled: bool,
    /// When the mirror fires.
    pub schedule: CronSchedule,
    /// Pull or push.
    pub direction: MirrorDirection,
    /// Name of the credential used against the remote; resolved by the transport.
    #[serde(default)]
    pub credential: Option<String>,
    /// Directory inside the local repository, e.g. `/` or `/configs/`.
    pub local_path: String,
    /// Remote repository URI.
    pub remote_uri: String,
    /// Directory inside the remote repository.
    pub remote_path: String,
    /// Remote branch, transport default when unset.
    #[serde(default)]
    pub remote_branch: Option<String>,
    /// Newline-separated glob patterns excluded from mirroring.
    #[serde(default)]
    pub content_filter: Option<String>,
    /// Per-run file cap; the service default applies when unset.
    #[serde(default)]
    pub max_files: Option<u32>,
    /// Per-run byte cap; the service default applies when unset.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl MirrorConfig {
    /// Create an enabled mirror rooted at `/` on both sides.
    pub fn new(
        id: impl Into<String>,
        project: impl Into<String>,
        repo: impl Into<String>,
        schedule: CronSchedule,
        direction: MirrorDirection,
        remote_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            repo: repo.into(),
            enabled: true,
            schedule,
            direction,
            credential: None,
            local_path: "/".into(),
            remote_uri: remote_uri.into(),
            remote_path: "/".into(),
            remote_branch: None,
            content_filter: None,
            max_files: None,
            max_bytes: None,
        }
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the local directory.
    #[must_use]
    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = path.into();
        self
    }

    /// Set the remote directory.
    #[must_use]
    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = path.into();
        self
    }

    /// Set the exclusion patterns.
    #[must_use]
    pub fn with_content_filter(mut self, filter: impl Into<String>) -> Self {
        self.content_filter = Some(filter.into());
        self
    }

    /// Override the per-run caps.
    #[must_use]
    pub const fn with_caps(mut self, max_files: u32, max_bytes: u64) -> Self {
        self.max_files = Some(max_files);
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Project-qualified identity used for schedule state, metrics and logs.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.project, self.id)
    }
}

/// Outcome status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MirrorStatus {
    /// Content was transferred.
    Success,
    /// Nothing changed since the last synchronization.
    UpToDate,
    /// The run failed; see the result's cause.
    Error,
}

impl MirrorStatus {
    /// Stable lowercase label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::UpToDate => "up_to_date",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of exactly one run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorResult {
    /// Run identifier shared with the originating work item.
    pub run_id: Uuid,
    /// Project-qualified mirror key.
    pub mirror: String,
    /// Outcome.
    pub status: MirrorStatus,
    /// Human-readable summary of what happened.
    pub description: Option<String>,
    /// Failure cause for [`MirrorStatus::Error`].
    pub cause: Option<String>,
    /// When the schedule fired (or the on-demand run was requested).
    pub triggered_at: DateTime<Utc>,
    /// When the run finished; never earlier than `triggered_at`.
    pub completed_at: DateTime<Utc>,
}

impl MirrorResult {
    /// Build a result, clamping `completed_at` so it never precedes `triggered_at`.
    #[must_use]
    pub fn new(
        item: &WorkItem,
        status: MirrorStatus,
        description: Option<String>,
        cause: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: item.run_id,
            mirror: item.mirror.key(),
            status,
            description,
            cause,
            triggered_at: item.triggered_at,
            completed_at: completed_at.max(item.triggered_at),
        }
    }

    /// Build an [`MirrorStatus::Error`] result from any failure.
    #[must_use]
    pub fn failed(item: &WorkItem, cause: &super::MirrorError, completed_at: DateTime<Utc>) -> Self {
        Self::new(item, MirrorStatus::Error, None, Some(cause.to_string()), completed_at)
    }

    /// Wall-clock time between trigger and completion.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        (self.completed_at - self.triggered_at).to_std().unwrap_or_default()
    }
}

/// A due, admitted mirror run waiting for a worker slot.
#[derive(Debug)]
pub struct WorkItem {
    /// Correlation id for logs and the resulting [`MirrorResult`].
    pub run_id: Uuid,
    /// Mirror snapshot taken at the tick that produced this item.
    pub mirror: MirrorConfig,
    /// Fire time.
    pub triggered_at: DateTime<Utc>,
    /// Receives the result of on-demand runs.
    pub reply: Option<oneshot::Sender<MirrorResult>>,
}

impl WorkItem {
    /// Create a scheduled work item.
    #[must_use]
    pub fn new(mirror: MirrorConfig, triggered_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mirror,
            triggered_at,
            reply: None,
        }
    }

    /// Attach a reply channel for the result.
    #[must_use]
    pub fn with_reply(mut self, reply: oneshot::Sender<MirrorResult>) -> Self {
        self.reply = Some(reply);
        self
    }
}

/// Storage revision number. Negative values are relative to the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub i64);

impl Revision {
    /// The latest revision.
    pub const HEAD: Self = Self(-1);
    /// The first revision of a new repository.
    pub const INIT: Self = Self(1);

    /// Whether this revision is relative to the head.
    #[must_use]
    pub const fn is_relative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commit author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Author {
    /// Synthesized author for commits produced by a mirror.
    #[must_use]
    pub fn for_mirror(mirror: &MirrorConfig) -> Self {
        Self {
            name: format!("Mirror {}", mirror.id),
            email: format!("mirror+{}@{}.localhost", mirror.id, mirror.project),
        }
    }
}

/// One content change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// Create or replace a file.
    Upsert {
        /// Absolute repository path.
        path: String,
        /// New content.
        content: Vec<u8>,
    },
    /// Delete a file.
    Remove {
        /// Absolute repository path.
        path: String,
    },
}

impl Change {
    /// Path touched by this change.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Upsert { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Commands understood by the storage layer's command executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Apply `changes` on top of `base_revision`.
    Push {
        /// Who made the change.
        author: Author,
        /// Target project.
        project: String,
        /// Target repository.
        repo: String,
        /// Revision the changes were computed against.
        base_revision: Revision,
        /// One-line summary.
        summary: String,
        /// Longer description.
        detail: String,
        /// File changes, removals included.
        changes: Vec<Change>,
    },
}

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    /// Revision created by the commit.
    pub revision: Revision,
    /// Number of changes applied.
    pub changes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mirror() -> MirrorConfig {
        MirrorConfig::new(
            "m1",
            "foo",
            "bar",
            CronSchedule::parse("* * * * * *").unwrap(),
            MirrorDirection::RemoteToLocal,
            "file:///tmp/remote",
        )
    }

    #[test]
    fn result_never_completes_before_trigger() {
        let item = WorkItem::new(mirror(), Utc::now());
        let earlier = item.triggered_at - Duration::seconds(5);
        let result = MirrorResult::new(&item, MirrorStatus::Success, None, None, earlier);
        assert!(result.triggered_at <= result.completed_at);
        assert_eq!(result.elapsed(), std::time::Duration::ZERO);
    }

    #[test]
    fn key_is_project_qualified() {
        assert_eq!(mirror().key(), "foo/m1");
    }

    #[test]
    fn mirror_author_is_deterministic() {
        let a = Author::for_mirror(&mirror());
        assert_eq!(a, Author::for_mirror(&mirror()));
        assert_eq!(a.name, "Mirror m1");
    }

    #[test]
    fn status_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&MirrorStatus::UpToDate).unwrap();
        assert_eq!(json, "\"UP_TO_DATE\"");
    }
}
