//! Native implementation of [`ExecutionPool`] using OS threads.
//!
//! Each worker thread owns a single-threaded tokio runtime and pulls work
//! items from a shared unbounded crossbeam channel, so runs are served FIFO
//! and a slow run never blocks the scheduler's runtime.
//!
//! # Shutdown
//!
//! Shutdown interrupts rather than drains: in-flight runs observe the cancel
//! signal and finish as `ERROR` (dropping their work areas), queued items are
//! discarded and counted as cancelled, and every worker is joined before
//! [`ExecutionPool::shutdown`] returns.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionPoolConfig;
use crate::core::audit::MirrorPhase;
use crate::core::executor::{CancelSignal, WorkExecutor};
use crate::core::{MirrorError, MirrorResult, MirrorStatus, ResultSink, WorkItem};
use crate::runtime::{spawn_runtime_thread, LiveThreads};

use super::{PoolCounters, PoolError, PoolStats, Submission};

/// Queued-or-running runs per mirror key.
type Outstanding = Arc<Mutex<HashMap<String, usize>>>;

/// Worker pool with dedicated OS threads for mirror runs.
pub struct ExecutionPool<E>
where
    E: WorkExecutor,
{
    /// Pool configuration.
    config: ExecutionPoolConfig,

    /// Task sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<WorkItem>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Queued-or-running runs per mirror.
    outstanding: Outstanding,

    /// Shutdown flag (lock-free atomic).
    shutdown: Arc<AtomicBool>,

    /// Broadcasts cancellation to in-flight runs.
    cancel_tx: watch::Sender<bool>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Worker threads still alive.
    live: LiveThreads,

    /// Lifecycle and result reporting.
    sink: ResultSink,

    /// Phantom data for executor type.
    _executor: std::marker::PhantomData<E>,
}

impl<E> ExecutionPool<E>
where
    E: WorkExecutor,
{
    /// Create a pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` if the configuration is invalid,
    /// `PoolError::Internal` if a worker thread cannot be spawned.
    pub fn new(config: ExecutionPoolConfig, executor: E, sink: ResultSink) -> Result<Self, PoolError> {
        Self::with_live_threads(config, executor, sink, LiveThreads::new())
    }

    /// Like [`ExecutionPool::new`], counting worker threads in a caller-provided `live` counter.
    ///
    /// # Errors
    ///
    /// See [`ExecutionPool::new`].
    pub fn with_live_threads(
        config: ExecutionPoolConfig,
        executor: E,
        sink: ResultSink,
        live: LiveThreads,
    ) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (task_tx, task_rx) = unbounded::<WorkItem>();
        let counters = Arc::new(PoolCounters::default());
        let outstanding: Outstanding = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = Worker {
                id: worker_id,
                task_rx: task_rx.clone(),
                counters: Arc::clone(&counters),
                outstanding: Arc::clone(&outstanding),
                shutdown: Arc::clone(&shutdown),
                cancel: CancelSignal::new(cancel_rx.clone()),
                executor: executor.clone(),
                sink: sink.clone(),
            };
            let spawned = spawn_runtime_thread(
                format!("{}-{worker_id}", config.thread_name_prefix),
                config.thread_stack_size,
                &live,
                move |rt| worker.run(rt),
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Unwind the workers that did start before reporting.
                    shutdown.store(true, Ordering::Release);
                    drop(task_tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Internal(format!("failed to spawn worker thread: {e}")));
                }
            }
        }

        info!(worker_count = config.worker_count, "execution pool started");

        Ok(Self {
            config,
            task_tx: Mutex::new(Some(task_tx)),
            counters,
            outstanding,
            shutdown,
            cancel_tx,
            workers: Mutex::new(workers),
            live,
            sink,
            _executor: std::marker::PhantomData,
        })
    }

    /// Queue a work item.
    ///
    /// With `limit` set, the item is deferred instead of queued when the
    /// mirror already has that many runs queued or running. Without a limit
    /// the item is always queued; the queue is unbounded and never rejects.
    ///
    /// # Errors
    ///
    /// `PoolError::PoolShutdown` once [`ExecutionPool::shutdown`] has started.
    pub fn submit(&self, item: WorkItem, limit: Option<usize>) -> Result<Submission, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let key = item.mirror.key();
        let run_id = item.run_id;

        // Check and increment under one lock so concurrent submissions of the
        // same mirror cannot both slip under the limit.
        let mut outstanding = self.outstanding.lock();
        let current = outstanding.get(&key).copied().unwrap_or(0);
        if let Some(limit) = limit {
            if current >= limit {
                return Ok(Submission::Deferred { outstanding: current });
            }
        }

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };
        self.sink.record_phase(&key, Some(run_id), MirrorPhase::Queued);
        if task_tx.send(item).is_err() {
            return Err(PoolError::PoolShutdown);
        }
        outstanding.insert(key.clone(), current + 1);
        drop(task_tx_guard);
        drop(outstanding);

        self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);
        debug!(mirror = %key, run_id = %run_id, "work item queued");
        Ok(Submission::Queued)
    }

    /// Runs of `mirror_key` currently queued or running.
    #[must_use]
    pub fn outstanding(&self, mirror_key: &str) -> usize {
        self.outstanding.lock().get(mirror_key).copied().unwrap_or(0)
    }

    /// Worker threads still alive. Counts every thread sharing the pool's
    /// live counter.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.live.count()
    }

    /// Whether shutdown has started.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters
            .snapshot(self.config.worker_count, self.live.count())
    }

    /// Stop accepting work, cancel in-flight runs, discard queued ones and join
    /// every worker. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("shutting down execution pool");
        self.cancel_tx.send_replace(true);

        // Dropping the sender lets workers drain what is left and then exit.
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let worker_count = workers.len();
        for (idx, worker) in workers.into_iter().enumerate() {
            if worker.join().is_ok() {
                debug!(worker_id = idx, "worker joined");
            } else {
                warn!(worker_id = idx, "worker panicked");
            }
        }

        info!(
            worker_count,
            cancelled = self.counters.cancelled_tasks.load(Ordering::Relaxed),
            "execution pool shut down"
        );
    }
}

impl<E> Drop for ExecutionPool<E>
where
    E: WorkExecutor,
{
    fn drop(&mut self) {
        // Signal shutdown but don't join: explicit shutdown() is required for
        // a deterministic stop.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.cancel_tx.send_replace(true);
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("execution pool dropped without explicit shutdown; workers will exit on their own");
        }
    }
}

/// State owned by one worker thread.
struct Worker<E> {
    id: usize,
    task_rx: Receiver<WorkItem>,
    counters: Arc<PoolCounters>,
    outstanding: Outstanding,
    shutdown: Arc<AtomicBool>,
    cancel: CancelSignal,
    executor: E,
    sink: ResultSink,
}

impl<E> Worker<E>
where
    E: WorkExecutor,
{
    /// Blocking receive loop. Exits once the sender is dropped and the queue is empty.
    fn run(self, rt: &tokio::runtime::Runtime) {
        debug!(worker_id = self.id, "worker started");

        while let Ok(mut item) = self.task_rx.recv() {
            self.counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            let key = item.mirror.key();

            if self.shutdown.load(Ordering::Acquire) {
                self.counters.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
                self.release(&key);
                debug!(worker_id = self.id, mirror = %key, "discarding queued run on shutdown");
                continue;
            }

            self.counters.active_tasks.fetch_add(1, Ordering::Relaxed);
            self.sink.record_phase(&key, Some(item.run_id), MirrorPhase::Running);
            debug!(worker_id = self.id, mirror = %key, run_id = %item.run_id, "worker executing run");

            let reply = item.reply.take();
            let result = rt.block_on(execute_guarded(&self.executor, &item, self.cancel.clone()));

            self.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
            if result.status == MirrorStatus::Error {
                self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }

            self.sink.record_result(&result);
            self.release(&key);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }

        debug!(worker_id = self.id, "worker channel closed, exiting");
    }

    fn release(&self, key: &str) {
        let mut outstanding = self.outstanding.lock();
        if let Some(count) = outstanding.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                outstanding.remove(key);
            }
        }
    }
}

/// Run one item, turning cancellation and panics into `ERROR` results.
async fn execute_guarded<E: WorkExecutor>(
    executor: &E,
    item: &WorkItem,
    mut cancel: CancelSignal,
) -> MirrorResult {
    let run = AssertUnwindSafe(executor.execute(item)).catch_unwind();
    tokio::select! {
        biased;
        () = cancel.cancelled() => MirrorResult::failed(item, &MirrorError::Cancelled, Utc::now()),
        outcome = run => match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "mirror run panicked".to_string());
                error!(mirror = %item.mirror.key(), run_id = %item.run_id, panic = %message, "mirror run panicked");
                MirrorResult::failed(item, &MirrorError::Unexpected(message), Utc::now())
            }
        },
    }
}
