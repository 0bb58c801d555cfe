//! Filesystem transport for `file://` remotes.
//!
//! The remote repository is a plain directory. Its revision is a SHA-256 over
//! the sorted relative paths, lengths and modification times of the files
//! under the mirror's remote path. Computing it reads metadata only, so a
//! revision check costs the same for a huge tree as for a small one.
//!
//! Content is only read while transferring, one file at a time through
//! `tokio::fs`, after the file has been charged to the run's budget. Every
//! file is an await point, so a cancelled run stops between files.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::{
    ContentFilter, MirrorConfig, MirrorDirection, MirrorError, MirrorTransport, PushOutcome,
    RemoteSnapshot, Snapshot, TransferBudget, MIRROR_STATE_FILE,
};

const SCHEME: &str = "file://";

/// Revisions are abbreviated to this many hex digits.
const REVISION_LEN: usize = 40;

/// Transport for remotes that are local directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirectoryTransport;

impl LocalDirectoryTransport {
    /// New transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn root(mirror: &MirrorConfig) -> Result<PathBuf, MirrorError> {
        let base = mirror.remote_uri.strip_prefix(SCHEME).ok_or_else(|| {
            MirrorError::RemoteAccess(format!("not a file:// URI: {}", mirror.remote_uri))
        })?;
        Ok(Path::new(base).join(relative_path(&mirror.remote_path)?))
    }
}

/// Turn `/a/b.json` into `a/b.json`, refusing anything that escapes the root.
fn relative_path(path: &str) -> Result<PathBuf, MirrorError> {
    let relative = PathBuf::from(path.trim_start_matches('/'));
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(relative)
    } else {
        Err(MirrorError::InvalidConfig(format!("path escapes the mirror root: {path}")))
    }
}

fn remote_error(root: &Path, err: impl std::fmt::Display) -> MirrorError {
    MirrorError::RemoteAccess(format!("{}: {err}", root.display()))
}

/// One file of a remote tree, from its metadata.
#[derive(Debug)]
struct RemoteEntry {
    key: String,
    path: PathBuf,
    len: u64,
    modified_nanos: u128,
}

/// Files under `root`, sorted by key. Metadata only.
async fn list_files(root: &Path) -> Result<Vec<RemoteEntry>, MirrorError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&root))
        .await
        .map_err(|e| MirrorError::Unexpected(format!("remote listing task failed: {e}")))?
}

fn walk(root: &Path) -> Result<Vec<RemoteEntry>, MirrorError> {
    if !root.is_dir() {
        return Err(remote_error(root, "not a directory"));
    }
    let state_key = format!("/{MIRROR_STATE_FILE}");
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| remote_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| remote_error(root, e))?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .fold(String::new(), |mut acc, part| {
                acc.push('/');
                acc.push_str(&part);
                acc
            });
        if key == state_key {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| remote_error(root, e))?;
        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        files.push(RemoteEntry {
            key,
            path: entry.into_path(),
            len: metadata.len(),
            modified_nanos,
        });
    }
    Ok(files)
}

fn revision_of(entries: &[RemoteEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.key.as_bytes());
        hasher.update([0]);
        hasher.update(entry.len.to_be_bytes());
        hasher.update(entry.modified_nanos.to_be_bytes());
    }
    let mut revision = hex::encode(hasher.finalize());
    revision.truncate(REVISION_LEN);
    revision
}

async fn write_file(root: &Path, key: &str, content: &[u8]) -> Result<(), MirrorError> {
    let target = root.join(relative_path(key)?);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&target, content).await?;
    Ok(())
}

#[async_trait]
impl MirrorTransport for LocalDirectoryTransport {
    async fn remote_revision(&self, mirror: &MirrorConfig) -> Result<String, MirrorError> {
        Ok(revision_of(&list_files(&Self::root(mirror)?).await?))
    }

    async fn fetch(
        &self,
        mirror: &MirrorConfig,
        work_dir: &Path,
        filter: &ContentFilter,
        budget: &mut TransferBudget,
    ) -> Result<RemoteSnapshot, MirrorError> {
        let root = Self::root(mirror)?;
        let entries = list_files(&root).await?;
        let revision = revision_of(&entries);

        let mut files = Snapshot::new();
        for entry in entries {
            if filter.excludes(&entry.key) {
                continue;
            }
            // Charged before the copy, so an oversized tree never lands in the work area.
            budget.charge(entry.len)?;
            let staged = work_dir.join(relative_path(&entry.key)?);
            if let Some(parent) = staged.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&entry.path, &staged)
                .await
                .map_err(|e| remote_error(&entry.path, e))?;
            files.insert(entry.key, fs::read(&staged).await?);
        }

        debug!(mirror = %mirror.key(), files = files.len(), %revision, "fetched local remote");
        Ok(RemoteSnapshot { revision, files })
    }

    async fn push(
        &self,
        mirror: &MirrorConfig,
        work_dir: &Path,
        files: &Snapshot,
        filter: &ContentFilter,
        summary: &str,
    ) -> Result<PushOutcome, MirrorError> {
        let root = Self::root(mirror)?;
        fs::create_dir_all(&root).await?;

        // Only remote files that could equal a pushed one are read.
        let mut unchanged = BTreeSet::new();
        let mut stale = Vec::new();
        for entry in list_files(&root).await? {
            if filter.excludes(&entry.key) {
                continue;
            }
            match files.get(&entry.key) {
                None => stale.push(entry.key),
                Some(content) if content.len() as u64 == entry.len => {
                    let current = fs::read(&entry.path)
                        .await
                        .map_err(|e| remote_error(&entry.path, e))?;
                    if &current == content {
                        unchanged.insert(entry.key);
                    }
                }
                Some(_) => {}
            }
        }
        if stale.is_empty() && unchanged.len() == files.len() {
            return Ok(PushOutcome::UpToDate);
        }

        // Stage everything first so a bad path fails before the remote is touched.
        for (key, content) in files {
            write_file(work_dir, key, content).await?;
        }
        for (key, content) in files {
            if !unchanged.contains(key) {
                write_file(&root, key, content).await?;
            }
        }
        for key in &stale {
            fs::remove_file(root.join(relative_path(key)?)).await?;
        }

        let revision = revision_of(&list_files(&root).await?);
        debug!(mirror = %mirror.key(), %revision, summary, "pushed to local remote");
        Ok(PushOutcome::Pushed(revision))
    }

    fn supports(&self, mirror: &MirrorConfig, _direction: MirrorDirection) -> bool {
        mirror.remote_uri.starts_with(SCHEME)
    }
}
