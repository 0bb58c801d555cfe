//! Core scheduling abstractions: the ticker, admission gate, execution pool,
//! mirror runner and result sink.

pub mod access;
pub mod audit;
pub mod error;
pub mod executor;
pub mod model;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod transport;
pub mod worker_pool;

pub use access::{AccessDecision, AccessGate, AccessRule, DecisionSource, MirrorAccessController};
pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink, MirrorPhase, SkipReason};
pub use error::{AppResult, CapKind, MirrorError};
pub use executor::{CancelSignal, CommandExecutor, WorkExecutor};
pub use model::{
    Author, Change, Command, CommitResult, MirrorConfig, MirrorDirection, MirrorResult, MirrorStatus,
    Revision, Snapshot, WorkItem,
};
pub use runner::{MirrorRunner, MirrorState, RunnerTask, MIRROR_STATE_FILE};
pub use schedule::{CronSchedule, ScheduleState};
pub use scheduler::{MirrorSchedulingService, TickReport, Ticker};
pub use sink::{MetricsSink, PrometheusMetrics, ResultSink, DURATION_BUCKETS_SECS};
pub use storage::{MirrorRegistry, RepositoryStore};
pub use transport::{
    ContentFilter, MirrorTransport, PushOutcome, RemoteSnapshot, TransferBudget, TransferCaps,
};
pub use worker_pool::{ExecutionPool, PoolError, PoolStats, Submission};
