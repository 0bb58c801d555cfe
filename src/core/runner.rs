//! Mirror runner: one mirror invocation, end to end.
//!
//! The runner never fails past its boundary. Every error path, cap violations
//! and commit conflicts included, becomes a [`MirrorStatus::Error`] result.
//! Each run gets a scoped work area under the configured work directory which
//! is removed on every exit path, cancellation included, because it is owned
//! by the run's future.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SchedulingConfig;

use super::executor::{CommandExecutor, WorkExecutor};
use super::storage::RepositoryStore;
use super::transport::{ContentFilter, MirrorTransport, PushOutcome, TransferBudget, TransferCaps};
use super::{
    Author, Change, Command, MirrorConfig, MirrorDirection, MirrorError, MirrorResult, MirrorStatus,
    Revision, Snapshot, WorkItem,
};

/// File under a mirror's local path recording the last synchronized remote revision.
pub const MIRROR_STATE_FILE: &str = ".mirror_state.json";

/// Content of [`MIRROR_STATE_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorState {
    /// Remote revision the local content was last synchronized from.
    #[serde(rename = "sourceRevision")]
    pub source_revision: String,
}

impl MirrorState {
    fn read(snapshot: &Snapshot, path: &str) -> Option<Self> {
        snapshot
            .get(path)
            .and_then(|raw| serde_json::from_slice(raw).ok())
    }
}

/// Status and description of a run that did not fail.
struct Outcome {
    status: MirrorStatus,
    description: String,
}

impl Outcome {
    fn up_to_date(description: String) -> Self {
        Self {
            status: MirrorStatus::UpToDate,
            description,
        }
    }

    fn success(description: String) -> Self {
        Self {
            status: MirrorStatus::Success,
            description,
        }
    }
}

/// Executes single mirror runs against a transport and the repository store.
pub struct MirrorRunner {
    transports: Vec<Arc<dyn MirrorTransport>>,
    store: Arc<dyn RepositoryStore>,
    work_root: PathBuf,
    default_max_files: u32,
    default_max_bytes: u64,
}

impl MirrorRunner {
    /// Runner with one transport; work areas and default caps come from `config`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn MirrorTransport>,
        store: Arc<dyn RepositoryStore>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            transports: vec![transport],
            store,
            work_root: config.work_dir.clone(),
            default_max_files: config.default_max_files,
            default_max_bytes: config.default_max_bytes,
        }
    }

    /// Register another transport. Transports are tried in registration order.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn MirrorTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Parent directory of per-run work areas.
    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Run `item.mirror` as of `item.triggered_at`, persisting local changes through `commands`.
    pub async fn run(&self, item: &WorkItem, commands: &dyn CommandExecutor) -> MirrorResult {
        let mirror = &item.mirror;
        debug!(
            mirror = %mirror.key(),
            run_id = %item.run_id,
            direction = ?mirror.direction,
            "mirror run started"
        );

        match self.attempt(mirror, commands, item.triggered_at).await {
            Ok(outcome) => MirrorResult::new(
                item,
                outcome.status,
                Some(outcome.description),
                None,
                Utc::now(),
            ),
            Err(e) => MirrorResult::failed(item, &e, Utc::now()),
        }
    }

    async fn attempt(
        &self,
        mirror: &MirrorConfig,
        commands: &dyn CommandExecutor,
        triggered_at: DateTime<Utc>,
    ) -> Result<Outcome, MirrorError> {
        let transport = self.transport_for(mirror)?;
        let filter = ContentFilter::parse(mirror.content_filter.as_deref())?;
        let caps = TransferCaps::resolve(mirror, self.default_max_files, self.default_max_bytes);
        let mut budget = TransferBudget::new(caps);

        std::fs::create_dir_all(&self.work_root)?;
        let work_area = tempfile::Builder::new()
            .prefix("mirror-")
            .tempdir_in(&self.work_root)?;

        match mirror.direction {
            MirrorDirection::RemoteToLocal => {
                self.remote_to_local(transport, mirror, commands, work_area.path(), &filter, &mut budget)
                    .await
            }
            MirrorDirection::LocalToRemote => {
                self.local_to_remote(transport, mirror, triggered_at, work_area.path(), &filter, &mut budget)
                    .await
            }
        }
    }

    fn transport_for(&self, mirror: &MirrorConfig) -> Result<&dyn MirrorTransport, MirrorError> {
        self.transports
            .iter()
            .find(|t| t.supports(mirror, mirror.direction))
            .map(AsRef::as_ref)
            .ok_or_else(|| {
                MirrorError::RemoteAccess(format!("no transport supports '{}'", mirror.remote_uri))
            })
    }

    async fn remote_to_local(
        &self,
        transport: &dyn MirrorTransport,
        mirror: &MirrorConfig,
        commands: &dyn CommandExecutor,
        work_dir: &Path,
        filter: &ContentFilter,
        budget: &mut TransferBudget,
    ) -> Result<Outcome, MirrorError> {
        let local_prefix = dir_prefix(&mirror.local_path);
        let state_path = format!("{local_prefix}{MIRROR_STATE_FILE}");

        let head = self
            .store
            .normalize(&mirror.project, &mirror.repo, Revision::HEAD)
            .await?;
        let local = self
            .store
            .snapshot(&mirror.project, &mirror.repo, head, &local_prefix)
            .await?;

        let remote_revision = transport.remote_revision(mirror).await?;
        if MirrorState::read(&local, &state_path)
            .is_some_and(|state| state.source_revision == remote_revision)
        {
            return Ok(Outcome::up_to_date(format!(
                "Repository '{}' already at {remote_revision} of {}",
                mirror.repo, mirror.remote_uri
            )));
        }

        let mut fetched = transport.fetch(mirror, work_dir, filter, budget).await?;
        filter.apply(&mut fetched.files);
        debug!(
            mirror = %mirror.key(),
            files = budget.files(),
            bytes = budget.bytes(),
            revision = %fetched.revision,
            "remote content fetched"
        );

        let mut changes = diff_into(&local, &fetched.files, &local_prefix, &state_path, filter);
        if changes.is_empty() {
            return Ok(Outcome::up_to_date(format!(
                "Repository '{}' has no changes from {} of {}",
                mirror.repo, fetched.revision, mirror.remote_uri
            )));
        }

        let state = MirrorState {
            source_revision: fetched.revision.clone(),
        };
        let state_json = serde_json::to_vec_pretty(&state)
            .map_err(|e| MirrorError::Unexpected(format!("failed to encode mirror state: {e}")))?;
        changes.push(Change::Upsert {
            path: state_path,
            content: state_json,
        });

        let summary = format!(
            "Mirror {} of {} to the repository '{}'",
            fetched.revision, mirror.remote_uri, mirror.repo
        );
        let detail = format!(
            "Remote path: {}\nLocal path: {local_prefix}\nChanges: {}",
            mirror.remote_path,
            changes.len()
        );
        let command = Command::Push {
            author: Author::for_mirror(mirror),
            project: mirror.project.clone(),
            repo: mirror.repo.clone(),
            base_revision: head,
            summary: summary.clone(),
            detail,
            changes,
        };

        match commands.execute(command).await {
            Ok(commit) => Ok(Outcome::success(format!(
                "{summary} (revision {}, {} changes)",
                commit.revision, commit.changes
            ))),
            Err(MirrorError::RedundantChange) => Ok(Outcome::up_to_date(format!(
                "Repository '{}' already matches {} of {}",
                mirror.repo, fetched.revision, mirror.remote_uri
            ))),
            Err(e) => Err(e),
        }
    }

    async fn local_to_remote(
        &self,
        transport: &dyn MirrorTransport,
        mirror: &MirrorConfig,
        triggered_at: DateTime<Utc>,
        work_dir: &Path,
        filter: &ContentFilter,
        budget: &mut TransferBudget,
    ) -> Result<Outcome, MirrorError> {
        let local_prefix = dir_prefix(&mirror.local_path);
        let revision = self
            .store
            .revision_at(&mirror.project, &mirror.repo, triggered_at)
            .await?;
        let snapshot = self
            .store
            .snapshot(&mirror.project, &mirror.repo, revision, &local_prefix)
            .await?;

        let mut files: Snapshot = snapshot
            .into_iter()
            .filter_map(|(path, content)| {
                let relative = path.strip_prefix(&local_prefix)?;
                (relative != MIRROR_STATE_FILE).then(|| (format!("/{relative}"), content))
            })
            .collect();
        filter.apply(&mut files);
        budget.charge_snapshot(&files)?;

        let summary = format!(
            "Mirror revision {revision} of {}/{} to {}",
            mirror.project, mirror.repo, mirror.remote_uri
        );
        match transport.push(mirror, work_dir, &files, filter, &summary).await? {
            PushOutcome::Pushed(remote_revision) => Ok(Outcome::success(format!(
                "{summary} (remote revision {remote_revision}, {} files)",
                files.len()
            ))),
            PushOutcome::UpToDate => Ok(Outcome::up_to_date(format!(
                "{} already holds revision {revision} of {}/{}",
                mirror.remote_uri, mirror.project, mirror.repo
            ))),
        }
    }
}

/// Changes turning the local files under `local_prefix` into `remote` (keyed
/// relative to the remote path). Local files matched by `filter` are left alone.
fn diff_into(
    local: &Snapshot,
    remote: &Snapshot,
    local_prefix: &str,
    state_path: &str,
    filter: &ContentFilter,
) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut wanted = std::collections::BTreeSet::new();

    for (relative, content) in remote {
        let path = format!("{local_prefix}{}", relative.trim_start_matches('/'));
        if path == state_path {
            continue;
        }
        if local.get(&path) != Some(content) {
            changes.push(Change::Upsert {
                path: path.clone(),
                content: content.clone(),
            });
        }
        wanted.insert(path);
    }

    for path in local.keys() {
        if path == state_path || wanted.contains(path) {
            continue;
        }
        let relative = path.strip_prefix(local_prefix).unwrap_or(path);
        if !filter.excludes(&format!("/{relative}")) {
            changes.push(Change::Remove { path: path.clone() });
        }
    }
    changes
}

/// Normalize a directory path to `/a/b/` form.
pub(crate) fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

/// [`WorkExecutor`] that runs items through a [`MirrorRunner`] and commits
/// through the command executor handed to `start`.
#[derive(Clone)]
pub struct RunnerTask {
    runner: Arc<MirrorRunner>,
    commands: Arc<dyn CommandExecutor>,
}

impl RunnerTask {
    /// Bind a runner to a command executor.
    #[must_use]
    pub fn new(runner: Arc<MirrorRunner>, commands: Arc<dyn CommandExecutor>) -> Self {
        Self { runner, commands }
    }
}

#[async_trait]
impl WorkExecutor for RunnerTask {
    async fn execute(&self, item: &WorkItem) -> MirrorResult {
        self.runner.run(item, self.commands.as_ref()).await
    }
}
