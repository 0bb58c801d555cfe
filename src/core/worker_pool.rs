//! Execution pool: a fixed set of worker slots fed by an unbounded FIFO queue.
//!
//! Submission never rejects work while the pool is running. A due, admitted
//! mirror that reaches [`ExecutionPool::submit`] either runs or, if the pool is
//! shut down first, is counted as cancelled. Nothing is dropped silently.
//!
//! # Example
//!
//! ```rust,ignore
//! use mirror_scheduler::config::ExecutionPoolConfig;
//! use mirror_scheduler::core::{ExecutionPool, ResultSink, WorkItem};
//!
//! let pool = ExecutionPool::new(
//!     ExecutionPoolConfig::new().with_worker_count(4),
//!     my_executor,           // implements WorkExecutor
//!     ResultSink::new(metrics),
//! )?;
//! pool.submit(WorkItem::new(mirror, chrono::Utc::now()), None)?;
//! pool.shutdown();
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::MirrorError;

pub use native::ExecutionPool;

/// Errors that can occur when using an [`ExecutionPool`].
#[derive(Debug)]
pub enum PoolError {
    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure and the like).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<PoolError> for MirrorError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::PoolShutdown => Self::PoolShutdown,
            PoolError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            PoolError::Internal(msg) => Self::Unexpected(msg),
        }
    }
}

/// What happened to a submitted work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Queued for a worker slot.
    Queued,
    /// Not queued: the mirror already has `outstanding` runs queued or running,
    /// which meets the caller's limit.
    Deferred {
        /// Runs of the mirror queued or running at the time of the call.
        outstanding: usize,
    },
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Worker threads still alive.
    pub live_workers: usize,

    /// Currently executing runs.
    pub active_tasks: u64,

    /// Runs waiting in the queue.
    pub queued_tasks: u64,

    /// Runs that finished with `SUCCESS` or `UP_TO_DATE`.
    pub completed_tasks: u64,

    /// Runs that finished with `ERROR`.
    pub failed_tasks: u64,

    /// Queued runs discarded by shutdown.
    pub cancelled_tasks: u64,

    /// Total runs submitted.
    pub submitted_tasks: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, live_workers: usize) -> PoolStats {
        PoolStats {
            worker_count,
            live_workers,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
        }
    }
}
