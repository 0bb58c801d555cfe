//! Execution traits: what a worker slot runs and how changes are persisted.

use async_trait::async_trait;
use tokio::sync::watch;

use super::{Command, CommitResult, MirrorError, MirrorResult, WorkItem};

/// Abstraction for executing one [`WorkItem`] inside a worker slot.
///
/// Implementations must resolve every failure into a [`MirrorResult`]; the pool
/// additionally converts panics and cancellation into error results.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use mirror_scheduler::core::{MirrorResult, MirrorStatus, WorkExecutor, WorkItem};
///
/// #[derive(Clone)]
/// struct NoopExecutor;
///
/// #[async_trait]
/// impl WorkExecutor for NoopExecutor {
///     async fn execute(&self, item: &WorkItem) -> MirrorResult {
///         MirrorResult::new(item, MirrorStatus::UpToDate, None, None, chrono::Utc::now())
///     }
/// }
/// ```
#[async_trait]
pub trait WorkExecutor: Send + Sync + Clone + 'static {
    /// Run the item to completion.
    ///
    /// # Threading
    ///
    /// Called from a dedicated worker thread with its own single-threaded tokio
    /// runtime, so blocking here never stalls the scheduler.
    async fn execute(&self, item: &WorkItem) -> MirrorResult;
}

/// The storage layer's command executor.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Apply a command and return the resulting revision.
    ///
    /// # Errors
    ///
    /// [`MirrorError::CommitConflict`] when the base revision is stale or a change
    /// cannot be applied; [`MirrorError::RedundantChange`] when nothing changes.
    async fn execute(&self, command: Command) -> Result<CommitResult, MirrorError>;
}

/// Cooperative cancellation signal handed out by the execution pool.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Signal driven by `rx`; `true` means cancelled.
    #[must_use]
    pub const fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pends forever if the owning
    /// sender is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
