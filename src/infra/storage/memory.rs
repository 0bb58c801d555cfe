//! In-memory versioned repository store.
//!
//! Serves both sides of the storage boundary: the read side mirrors consume
//! ([`RepositoryStore`]) and the command executor commits go through
//! ([`CommandExecutor`]).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::{
    Author, Change, Command, CommandExecutor, CommitResult, MirrorError, RepositoryStore, Revision,
    Snapshot,
};

/// One committed revision.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// Revision number, starting at [`Revision::INIT`].
    pub revision: Revision,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
    /// Author.
    pub author: Author,
    /// One-line summary.
    pub summary: String,
    /// Full file tree after the commit.
    pub files: Snapshot,
}

#[derive(Debug, Default)]
struct Repository {
    history: Vec<CommitRecord>,
}

impl Repository {
    fn head(&self) -> Revision {
        Revision(i64::try_from(self.history.len()).unwrap_or(i64::MAX))
    }

    fn normalize(&self, revision: Revision) -> Result<Revision, MirrorError> {
        let head = self.head();
        let absolute = if revision.is_relative() {
            Revision(head.0 + revision.0 + 1)
        } else {
            revision
        };
        if absolute.0 < Revision::INIT.0 || absolute > head {
            return Err(MirrorError::Unexpected(format!(
                "revision {revision} out of range (head {head})"
            )));
        }
        Ok(absolute)
    }

    fn record(&self, revision: Revision) -> Option<&CommitRecord> {
        usize::try_from(revision.0 - 1)
            .ok()
            .and_then(|idx| self.history.get(idx))
    }
}

/// Repository store kept in memory, for development and testing.
#[derive(Default)]
pub struct InMemoryRepositoryStore {
    repos: RwLock<HashMap<(String, String), Repository>>,
    rejection: RwLock<Option<String>>,
}

impl InMemoryRepositoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with an empty initial revision. No-op if it exists.
    pub fn create_repo(&self, project: &str, repo: &str) {
        self.repos
            .write()
            .entry((project.to_string(), repo.to_string()))
            .or_insert_with(|| Repository {
                history: vec![CommitRecord {
                    revision: Revision::INIT,
                    committed_at: Utc::now(),
                    author: system_author(),
                    summary: "Create a new repository".into(),
                    files: Snapshot::new(),
                }],
            });
    }

    /// Reject every commit with a conflict carrying `reason`, until cleared with `None`.
    pub fn reject_commits(&self, reason: Option<String>) {
        *self.rejection.write() = reason;
    }

    /// Commits of a repository, oldest first.
    #[must_use]
    pub fn history(&self, project: &str, repo: &str) -> Vec<CommitRecord> {
        self.repos
            .read()
            .get(&(project.to_string(), repo.to_string()))
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    /// Commits made after the initial revision.
    #[must_use]
    pub fn commit_count(&self, project: &str, repo: &str) -> usize {
        self.history(project, repo).len().saturating_sub(1)
    }

    /// Files at the head revision.
    #[must_use]
    pub fn head_files(&self, project: &str, repo: &str) -> Snapshot {
        self.history(project, repo)
            .pop()
            .map(|r| r.files)
            .unwrap_or_default()
    }

    fn with_repo<T>(
        &self,
        project: &str,
        repo: &str,
        f: impl FnOnce(&Repository) -> Result<T, MirrorError>,
    ) -> Result<T, MirrorError> {
        let repos = self.repos.read();
        let repository = repos
            .get(&(project.to_string(), repo.to_string()))
            .ok_or_else(|| missing(project, repo))?;
        f(repository)
    }

    fn push(
        &self,
        author: Author,
        project: &str,
        repo: &str,
        base_revision: Revision,
        summary: String,
        changes: &[Change],
    ) -> Result<CommitResult, MirrorError> {
        if let Some(reason) = self.rejection.read().clone() {
            return Err(MirrorError::CommitConflict(reason));
        }

        let mut repos = self.repos.write();
        let repository = repos
            .get_mut(&(project.to_string(), repo.to_string()))
            .ok_or_else(|| missing(project, repo))?;

        let head = repository.head();
        let base = repository.normalize(base_revision)?;
        if base != head {
            return Err(MirrorError::CommitConflict(format!(
                "base revision {base} is not the head revision {head}"
            )));
        }

        let current = repository
            .record(head)
            .map(|r| r.files.clone())
            .unwrap_or_default();
        let mut files = current.clone();
        for change in changes {
            match change {
                Change::Upsert { path, content } => {
                    files.insert(path.clone(), content.clone());
                }
                Change::Remove { path } => {
                    if files.remove(path).is_none() {
                        return Err(MirrorError::CommitConflict(format!(
                            "cannot remove non-existent file '{path}'"
                        )));
                    }
                }
            }
        }
        if files == current {
            return Err(MirrorError::RedundantChange);
        }

        let revision = Revision(head.0 + 1);
        repository.history.push(CommitRecord {
            revision,
            committed_at: Utc::now(),
            author,
            summary,
            files,
        });
        Ok(CommitResult {
            revision,
            changes: changes.len(),
        })
    }
}

fn system_author() -> Author {
    Author {
        name: "System".into(),
        email: "system@localhost".into(),
    }
}

fn missing(project: &str, repo: &str) -> MirrorError {
    MirrorError::Unexpected(format!("repository '{project}/{repo}' does not exist"))
}

#[async_trait]
impl RepositoryStore for InMemoryRepositoryStore {
    async fn normalize(&self, project: &str, repo: &str, revision: Revision) -> Result<Revision, MirrorError> {
        self.with_repo(project, repo, |r| r.normalize(revision))
    }

    async fn revision_at(&self, project: &str, repo: &str, at: DateTime<Utc>) -> Result<Revision, MirrorError> {
        self.with_repo(project, repo, |r| {
            Ok(r.history
                .iter()
                .rev()
                .find(|c| c.committed_at <= at)
                .map_or(Revision::INIT, |c| c.revision))
        })
    }

    async fn snapshot(
        &self,
        project: &str,
        repo: &str,
        revision: Revision,
        prefix: &str,
    ) -> Result<Snapshot, MirrorError> {
        self.with_repo(project, repo, |r| {
            let revision = r.normalize(revision)?;
            Ok(r.record(revision)
                .map(|c| {
                    c.files
                        .iter()
                        .filter(|(path, _)| path.starts_with(prefix))
                        .map(|(path, content)| (path.clone(), content.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

#[async_trait]
impl CommandExecutor for InMemoryRepositoryStore {
    async fn execute(&self, command: Command) -> Result<CommitResult, MirrorError> {
        match command {
            Command::Push {
                author,
                project,
                repo,
                base_revision,
                summary,
                changes,
                ..
            } => self.push(author, &project, &repo, base_revision, summary, &changes),
        }
    }
}
