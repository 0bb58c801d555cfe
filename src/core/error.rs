//! Error types for mirror scheduling and execution.

use thiserror::Error;

/// Which per-run cap a transfer exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    /// Number of files.
    Files,
    /// Total content bytes.
    Bytes,
}

impl std::fmt::Display for CapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files => f.write_str("files"),
            Self::Bytes => f.write_str("bytes"),
        }
    }
}

/// Errors produced by the mirror engine and its collaborators.
///
/// Every variant is contained at the smallest enclosing scope: a single run,
/// a single project, or a single tick. Only [`MirrorError::InvalidConfig`] is
/// allowed to stop the engine, and only at startup.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Enumerating one project's mirrors failed.
    #[error("failed to enumerate mirrors of project '{project}': {reason}")]
    ConfigEnumeration {
        /// Project whose registry read failed.
        project: String,
        /// Backend-provided reason.
        reason: String,
    },
    /// The access policy refused the mirror target.
    #[error("access to '{0}' is not allowed")]
    AccessDenied(String),
    /// The access policy backend could not be consulted.
    #[error("access check failed: {0}")]
    AccessCheck(String),
    /// The remote repository could not be reached or read.
    #[error("remote access failed: {0}")]
    RemoteAccess(String),
    /// A transfer exceeded its file or byte cap.
    #[error("mirror exceeded the maximum number of {kind} ({limit})")]
    ResourceCapExceeded {
        /// Cap that was breached.
        kind: CapKind,
        /// Configured limit.
        limit: u64,
    },
    /// The storage layer rejected the commit.
    #[error("commit conflict: {0}")]
    CommitConflict(String),
    /// A commit carried no effective change.
    #[error("redundant change: nothing to commit")]
    RedundantChange,
    /// A cron expression could not be parsed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// Offending expression.
        expr: String,
        /// Parser message.
        reason: String,
    },
    /// Startup configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Local I/O failure (work area, filesystem transport).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Metrics could not be created or registered.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The run was interrupted by shutdown.
    #[error("mirror run cancelled")]
    Cancelled,
    /// The execution pool no longer accepts work.
    #[error("execution pool has been shut down")]
    PoolShutdown,
    /// Anything else, including panics caught at the pool boundary.
    #[error("unexpected fault: {0}")]
    Unexpected(String),
}

impl MirrorError {
    /// Returns `false` for outcomes that are ordinary control flow rather than faults.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        !matches!(self, Self::AccessDenied(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
