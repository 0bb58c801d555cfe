//! The scheduling timeline: ticker and the service that drives it.
//!
//! One dedicated thread owns the [`Ticker`] and its [`ScheduleState`]. Each
//! tick re-reads the registry, decides which mirrors fired since they were last
//! checked, and dispatches an admission task per due mirror. Admission tasks
//! run on the scheduler's own runtime and submit to the [`ExecutionPool`]
//! without waiting for the run, so a slow access policy or a slow mirror never
//! stalls the timeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{ExecutionPoolConfig, SchedulingConfig};
use crate::runtime::{spawn_runtime_thread, LiveThreads};

use super::access::AccessGate;
use super::audit::{MirrorPhase, SkipReason};
use super::executor::{CommandExecutor, WorkExecutor};
use super::runner::{MirrorRunner, RunnerTask};
use super::schedule::ScheduleState;
use super::storage::MirrorRegistry;
use super::worker_pool::{ExecutionPool, PoolError, PoolStats, Submission};
use super::{MirrorConfig, MirrorError, MirrorResult, ResultSink, WorkItem};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Projects listed by the registry.
    pub projects: usize,
    /// Enabled mirrors seen across the projects that could be read.
    pub enumerated: usize,
    /// Mirrors whose schedule fired in this tick's window.
    pub due: usize,
    /// Admission checks dispatched; one per due mirror.
    pub dispatched: usize,
    /// Projects whose mirrors could not be read.
    pub failed_projects: Vec<String>,
}

/// One scheduling timeline.
///
/// Not shared: the owner calls [`Ticker::tick`] once per period. Admission
/// tasks are spawned onto the current runtime and aborted when the ticker is
/// dropped.
pub struct Ticker<E>
where
    E: WorkExecutor,
{
    registry: Arc<dyn MirrorRegistry>,
    gate: AccessGate,
    pool: Arc<ExecutionPool<E>>,
    sink: ResultSink,
    limit: Option<usize>,
    state: ScheduleState,
    admissions: JoinSet<()>,
}

impl<E> Ticker<E>
where
    E: WorkExecutor,
{
    /// Ticker whose first window opens at `start`.
    ///
    /// `limit` caps queued-or-running runs per mirror; `None` queues every due tick.
    #[must_use]
    pub fn new(
        registry: Arc<dyn MirrorRegistry>,
        gate: AccessGate,
        pool: Arc<ExecutionPool<E>>,
        sink: ResultSink,
        limit: Option<usize>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            registry,
            gate,
            pool,
            sink,
            limit,
            state: ScheduleState::starting_at(start),
            admissions: JoinSet::new(),
        }
    }

    /// Schedule state carried between ticks.
    #[must_use]
    pub const fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Admission tasks not finished yet.
    #[must_use]
    pub fn pending_admissions(&self) -> usize {
        self.admissions.len()
    }

    /// Run one tick at wall-clock time `now`.
    ///
    /// Must be called from within a tokio runtime; admission tasks are spawned
    /// onto it.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        while self.admissions.try_join_next().is_some() {}

        let mut report = TickReport::default();
        let projects = match self.registry.projects().await {
            Ok(projects) => projects,
            Err(e) => {
                // Nothing was read, so nothing is pruned and no window closes.
                warn!(error = %e, "failed to list projects; skipping tick");
                return report;
            }
        };
        report.projects = projects.len();

        let registry = &self.registry;
        let listings = futures::future::join_all(projects.into_iter().map(|project| async move {
            let mirrors = registry.mirrors(&project).await;
            (project, mirrors)
        }))
        .await;

        let mut seen = HashSet::new();
        let mut failed = HashSet::new();
        let mut due = Vec::new();
        for (project, listing) in listings {
            match listing {
                Ok(mirrors) => {
                    for mirror in mirrors.into_iter().filter(|m| m.enabled) {
                        report.enumerated += 1;
                        seen.insert(mirror.key());
                        if self.state.check_due(&mirror, now) {
                            due.push(mirror);
                        }
                    }
                }
                Err(e) => {
                    self.sink.record_enumeration_failure(&project, &e);
                    failed.insert(project);
                }
            }
        }
        self.state.finish_tick(now, &seen, &failed);

        report.due = due.len();
        for mirror in due {
            self.sink.record_phase(&mirror.key(), None, MirrorPhase::Due);
            self.admissions.spawn(admit(
                self.gate.clone(),
                Arc::clone(&self.pool),
                self.sink.clone(),
                self.limit,
                mirror,
                now,
            ));
            report.dispatched += 1;
        }

        report.failed_projects = failed.into_iter().collect();
        report.failed_projects.sort();
        debug!(
            projects = report.projects,
            enumerated = report.enumerated,
            due = report.due,
            failed = report.failed_projects.len(),
            "tick finished"
        );
        report
    }

    /// Wait for every dispatched admission task to finish.
    pub async fn settle(&mut self) {
        while self.admissions.join_next().await.is_some() {}
    }
}

/// Ask the gate about one due mirror and queue it if allowed.
async fn admit<E: WorkExecutor>(
    gate: AccessGate,
    pool: Arc<ExecutionPool<E>>,
    sink: ResultSink,
    limit: Option<usize>,
    mirror: MirrorConfig,
    triggered_at: DateTime<Utc>,
) {
    let key = mirror.key();
    let decision = gate.check(&mirror).await;
    if !decision.allowed {
        let detail = decision
            .matched
            .as_ref()
            .map(|rule| format!("{} ({})", rule.target_pattern, rule.reason));
        sink.record_skip(&key, SkipReason::AccessDenied, detail);
        return;
    }

    match pool.submit(WorkItem::new(mirror, triggered_at), limit) {
        Ok(Submission::Queued) => {}
        Ok(Submission::Deferred { outstanding }) => {
            warn!(mirror = %key, outstanding, "previous runs still outstanding; skipping this tick");
            sink.record_skip(
                &key,
                SkipReason::Outstanding,
                Some(format!("{outstanding} runs outstanding")),
            );
        }
        Err(PoolError::PoolShutdown) => {
            sink.record_skip(&key, SkipReason::Shutdown, None);
        }
        Err(e) => {
            warn!(mirror = %key, error = %e, "failed to submit mirror run");
            sink.record_skip(&key, SkipReason::Shutdown, Some(e.to_string()));
        }
    }
}

/// Handles of a started service.
struct Running {
    pool: Arc<ExecutionPool<RunnerTask>>,
    stop_tx: watch::Sender<bool>,
    scheduler: JoinHandle<()>,
}

/// Periodic mirror scheduling service.
///
/// `start` provisions the worker pool and the scheduler thread; `stop` joins
/// both. Each is idempotent and `stop` without `start` is a no-op.
///
/// # Example
///
/// ```rust,ignore
/// let service = MirrorSchedulingServiceBuilder::new(config)
///     .registry(registry)
///     .transport(Arc::new(LocalDirectoryTransport::new()))
///     .store(store.clone())
///     .build()?;
/// service.start(store)?;
/// // ...
/// service.stop();
/// ```
pub struct MirrorSchedulingService {
    config: SchedulingConfig,
    registry: Arc<dyn MirrorRegistry>,
    gate: AccessGate,
    runner: Arc<MirrorRunner>,
    sink: ResultSink,
    live: LiveThreads,
    running: Mutex<Option<Running>>,
}

impl MirrorSchedulingService {
    /// Assemble a service. Nothing runs until [`MirrorSchedulingService::start`].
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: SchedulingConfig,
        registry: Arc<dyn MirrorRegistry>,
        gate: AccessGate,
        runner: Arc<MirrorRunner>,
        sink: ResultSink,
    ) -> Result<Self, MirrorError> {
        config.validate().map_err(MirrorError::InvalidConfig)?;
        Ok(Self {
            config,
            registry,
            gate,
            runner,
            sink,
            live: LiveThreads::new(),
            running: Mutex::new(None),
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Provision the workers and begin ticking. Commits go through `commands`.
    ///
    /// # Errors
    ///
    /// [`MirrorError::InvalidConfig`] or a thread spawn failure; nothing is
    /// left running in either case.
    pub fn start(&self, commands: Arc<dyn CommandExecutor>) -> Result<(), MirrorError> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("mirror scheduling service already started");
            return Ok(());
        }

        let pool = Arc::new(ExecutionPool::with_live_threads(
            ExecutionPoolConfig::from_scheduling(&self.config),
            RunnerTask::new(Arc::clone(&self.runner), commands),
            self.sink.clone(),
            self.live.clone(),
        )?);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut ticker = Ticker::new(
            Arc::clone(&self.registry),
            self.gate.clone(),
            Arc::clone(&pool),
            self.sink.clone(),
            self.config.outstanding_limit(),
            Utc::now(),
        );
        let period = self.config.tick_interval();

        let scheduler = spawn_runtime_thread(
            "mirror-scheduler".into(),
            self.config.thread_stack_size,
            &self.live,
            move |rt| {
                rt.block_on(async move {
                    let mut stop_rx = stop_rx;
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            biased;
                            _ = stop_rx.wait_for(|stopped| *stopped) => break,
                            _ = interval.tick() => {
                                ticker.tick(Utc::now()).await;
                            }
                        }
                    }
                    debug!(
                        pending_admissions = ticker.pending_admissions(),
                        "scheduler loop exiting"
                    );
                });
            },
        );
        let scheduler = match scheduler {
            Ok(handle) => handle,
            Err(e) => {
                pool.shutdown();
                return Err(MirrorError::Io(e));
            }
        };

        info!(
            worker_count = self.config.worker_count,
            tick_interval_ms = self.config.tick_interval_ms,
            overlap = ?self.config.overlap,
            "mirror scheduling service started"
        );
        *running = Some(Running {
            pool,
            stop_tx,
            scheduler,
        });
        Ok(())
    }

    /// Stop ticking, cancel in-flight runs, discard queued ones and join every
    /// thread. Returns once no scheduler or worker thread is alive.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        running.stop_tx.send_replace(true);
        if running.scheduler.join().is_err() {
            warn!("scheduler thread panicked");
        }
        running.pool.shutdown();
        info!(live_threads = self.live.count(), "mirror scheduling service stopped");
    }

    /// Whether the service has been started and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Scheduler and worker threads currently alive.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.live.count()
    }

    /// Pool statistics while running.
    #[must_use]
    pub fn stats(&self) -> Option<PoolStats> {
        self.running.lock().as_ref().map(|r| r.pool.stats())
    }

    /// Run a mirror now, outside its schedule, and wait for the result.
    ///
    /// The run goes through the same access gate and worker pool as scheduled
    /// runs, but is never deferred by the overlap policy.
    ///
    /// # Errors
    ///
    /// [`MirrorError::AccessDenied`] if the gate refuses the target,
    /// [`MirrorError::PoolShutdown`] if the service is not running and
    /// [`MirrorError::Cancelled`] if the service stops before the run finishes.
    pub async fn run_now(&self, mirror: MirrorConfig) -> Result<MirrorResult, MirrorError> {
        let pool = self
            .running
            .lock()
            .as_ref()
            .map(|r| Arc::clone(&r.pool))
            .ok_or(MirrorError::PoolShutdown)?;

        let key = mirror.key();
        let decision = self.gate.check(&mirror).await;
        if !decision.allowed {
            self.sink.record_skip(&key, SkipReason::AccessDenied, Some("on demand".into()));
            return Err(MirrorError::AccessDenied(mirror.remote_uri));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let item = WorkItem::new(mirror, Utc::now()).with_reply(reply_tx);
        debug!(mirror = %key, run_id = %item.run_id, "on-demand run requested");
        pool.submit(item, None)?;
        drop(pool);

        reply_rx.await.map_err(|_| MirrorError::Cancelled)
    }
}

impl Drop for MirrorSchedulingService {
    fn drop(&mut self) {
        self.stop();
    }
}
