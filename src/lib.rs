//! # Mirror Scheduler
//!
//! A periodic mirror scheduling and execution engine: it keeps externally
//! hosted repositories and internally stored, versioned repositories in sync
//! on a per-mirror cron schedule.
//!
//! ## Core Problem Solved
//!
//! Mirrors are independently configured jobs with their own schedules, remote
//! targets and size limits. The engine has to:
//!
//! - **Never drop a due tick**: a saturated worker pool queues work instead of rejecting it
//! - **Admit per target**: every due run is checked against a pluggable access policy
//! - **Bound each run**: file and byte caps turn oversized transfers into errors, not partial commits
//! - **Contain failures**: a broken project, policy backend or mirror never stops the timeline
//! - **Stop cleanly**: `stop()` returns with no scheduler or worker thread left alive
//!
//! ## Components
//!
//! - [`core::Ticker`]: re-reads the registry each tick and decides which mirrors are due
//! - [`core::AccessGate`]: resolves every admission check, failures included, to a boolean
//! - [`core::ExecutionPool`]: fixed worker threads draining an unbounded FIFO queue
//! - [`core::MirrorRunner`]: one run end to end, inside a scoped work area
//! - [`core::ResultSink`]: status counters, duration histograms, logs and audit events
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mirror_scheduler::builders::MirrorSchedulingServiceBuilder;
//! use mirror_scheduler::config::SchedulingConfig;
//! use mirror_scheduler::infra::{InMemoryMirrorRegistry, InMemoryRepositoryStore};
//!
//! let store = Arc::new(InMemoryRepositoryStore::new());
//! let service = MirrorSchedulingServiceBuilder::new(SchedulingConfig::from_env()?)
//!     .registry(Arc::new(InMemoryMirrorRegistry::new()))
//!     .store(store.clone())
//!     .build()?;
//!
//! service.start(store)?;
//! // ...
//! service.stop();
//! ```
//!
//! For complete scenarios, see `tests/scheduling_service_test.rs`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: ticker, gate, pool, runner and sink.
pub mod core;
/// Configuration models for the scheduling service and the execution pool.
pub mod config;
/// Builders to construct the service from configuration.
pub mod builders;
/// Infrastructure adapters for the registry, access policy, storage and transport.
pub mod infra;
/// Runtime adapters: dedicated threads driving their own tokio runtime.
pub mod runtime;
/// Shared utilities.
pub mod util;
