//! Read-side interfaces of the external collaborators: the mirror registry and
//! the versioned repository store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MirrorConfig, MirrorError, Revision, Snapshot};

/// Source of mirror definitions. Consumed every tick, never cached.
#[async_trait]
pub trait MirrorRegistry: Send + Sync {
    /// Names of all projects that may own mirrors.
    async fn projects(&self) -> Result<Vec<String>, MirrorError>;

    /// Current mirrors of one project, as last committed.
    ///
    /// # Errors
    ///
    /// [`MirrorError::ConfigEnumeration`] when the project's definitions cannot be read.
    async fn mirrors(&self, project: &str) -> Result<Vec<MirrorConfig>, MirrorError>;

    /// One mirror by id.
    async fn find(&self, project: &str, id: &str) -> Result<Option<MirrorConfig>, MirrorError> {
        Ok(self.mirrors(project).await?.into_iter().find(|m| m.id == id))
    }
}

/// Read access to the versioned repositories mirrors synchronize with.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Resolve a possibly relative revision (e.g. [`Revision::HEAD`]) to an absolute one.
    async fn normalize(&self, project: &str, repo: &str, revision: Revision) -> Result<Revision, MirrorError>;

    /// Latest revision committed at or before `at`.
    async fn revision_at(&self, project: &str, repo: &str, at: DateTime<Utc>) -> Result<Revision, MirrorError>;

    /// Files under `prefix` (a directory path ending in `/`) at `revision`.
    async fn snapshot(
        &self,
        project: &str,
        repo: &str,
        revision: Revision,
        prefix: &str,
    ) -> Result<Snapshot, MirrorError>;
}
