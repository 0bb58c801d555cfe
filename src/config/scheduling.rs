//! Scheduling service configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Smallest tick period; the cron grammar cannot express anything finer.
pub const MIN_TICK_INTERVAL_MS: u64 = 1_000;

/// Default cap on files transferred by a single run.
pub const DEFAULT_MAX_FILES: u32 = 8_192;

/// Default cap on bytes transferred by a single run (32 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 32 * 1024 * 1024;

const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_AUDIT_CAPACITY: usize = 1_024;

/// How a failing access policy is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessFailurePolicy {
    /// Treat failures as denial.
    #[default]
    FailClosed,
    /// Treat failures as permission.
    FailOpen,
}

impl AccessFailurePolicy {
    /// The boolean a failed check resolves to.
    #[must_use]
    pub const fn allows(self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

/// What happens when a mirror becomes due while earlier runs are still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Queue every due tick; runs of the same mirror execute back to back.
    #[default]
    CatchUp,
    /// Skip the tick while a run of the same mirror is queued or running.
    SkipIfRunning,
}

/// Scheduling service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Number of worker slots.
    pub worker_count: usize,
    /// Tick period in milliseconds.
    pub tick_interval_ms: u64,
    /// Per-run file cap for mirrors that do not set one.
    pub default_max_files: u32,
    /// Per-run byte cap for mirrors that do not set one.
    pub default_max_bytes: u64,
    /// Parent directory of per-run work areas.
    pub work_dir: PathBuf,
    /// Stack size of scheduler and worker threads.
    pub thread_stack_size: usize,
    /// Resolution of failed access checks.
    pub access_failure: AccessFailurePolicy,
    /// Access checks slower than this are treated as failed.
    pub access_timeout_ms: Option<u64>,
    /// Overlapping-run policy.
    pub overlap: OverlapPolicy,
    /// With [`OverlapPolicy::CatchUp`], skip ticks once this many runs of a
    /// mirror are queued or running.
    pub max_outstanding_per_mirror: Option<usize>,
    /// Number of lifecycle events retained by the in-memory audit trail.
    pub audit_capacity: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            tick_interval_ms: MIN_TICK_INTERVAL_MS,
            default_max_files: DEFAULT_MAX_FILES,
            default_max_bytes: DEFAULT_MAX_BYTES,
            work_dir: std::env::temp_dir(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            access_failure: AccessFailurePolicy::default(),
            access_timeout_ms: None,
            overlap: OverlapPolicy::default(),
            max_outstanding_per_mirror: None,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl SchedulingConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker slots.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the tick period.
    #[must_use]
    pub const fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    /// Set the default per-run caps.
    #[must_use]
    pub const fn with_default_caps(mut self, max_files: u32, max_bytes: u64) -> Self {
        self.default_max_files = max_files;
        self.default_max_bytes = max_bytes;
        self
    }

    /// Set the parent directory of work areas.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Set the failure policy of access checks.
    #[must_use]
    pub const fn with_access_failure(mut self, policy: AccessFailurePolicy) -> Self {
        self.access_failure = policy;
        self
    }

    /// Set the access check timeout.
    #[must_use]
    pub const fn with_access_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.access_timeout_ms = timeout_ms;
        self
    }

    /// Set the overlap policy.
    #[must_use]
    pub const fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Cap queued-or-running runs per mirror under [`OverlapPolicy::CatchUp`].
    #[must_use]
    pub const fn with_max_outstanding_per_mirror(mut self, max: Option<usize>) -> Self {
        self.max_outstanding_per_mirror = max;
        self
    }

    /// Tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Access check timeout.
    #[must_use]
    pub fn access_timeout(&self) -> Option<Duration> {
        self.access_timeout_ms.map(Duration::from_millis)
    }

    /// Maximum number of queued-or-running runs per mirror, if any.
    #[must_use]
    pub const fn outstanding_limit(&self) -> Option<usize> {
        match self.overlap {
            OverlapPolicy::SkipIfRunning => Some(1),
            OverlapPolicy::CatchUp => self.max_outstanding_per_mirror,
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(format!(
                "tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS} (cron resolution is one second)"
            ));
        }
        if self.default_max_files == 0 {
            return Err("default_max_files must be greater than 0".into());
        }
        if self.default_max_bytes == 0 {
            return Err("default_max_bytes must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.access_timeout_ms == Some(0) {
            return Err("access_timeout_ms must be greater than 0 when set".into());
        }
        if self.max_outstanding_per_mirror == Some(0) {
            return Err("max_outstanding_per_mirror must be greater than 0 when set".into());
        }
        if self.audit_capacity == 0 {
            return Err("audit_capacity must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from `MIRROR_*` environment variables, reading a
    /// `.env` file first when one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails when a variable cannot be parsed or the result does not validate.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();

        if let Some(v) = env_var("MIRROR_WORKER_COUNT") {
            cfg.worker_count = v.parse().context("MIRROR_WORKER_COUNT")?;
        }
        if let Some(v) = env_var("MIRROR_TICK_INTERVAL_MS") {
            cfg.tick_interval_ms = v.parse().context("MIRROR_TICK_INTERVAL_MS")?;
        }
        if let Some(v) = env_var("MIRROR_MAX_FILES") {
            cfg.default_max_files = v.parse().context("MIRROR_MAX_FILES")?;
        }
        if let Some(v) = env_var("MIRROR_MAX_BYTES") {
            cfg.default_max_bytes = v.parse().context("MIRROR_MAX_BYTES")?;
        }
        if let Some(v) = env_var("MIRROR_WORK_DIR") {
            cfg.work_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("MIRROR_ACCESS_FAILURE") {
            cfg.access_failure = serde_json::from_value(serde_json::Value::String(v))
                .context("MIRROR_ACCESS_FAILURE must be fail_open or fail_closed")?;
        }
        if let Some(v) = env_var("MIRROR_ACCESS_TIMEOUT_MS") {
            cfg.access_timeout_ms = Some(v.parse().context("MIRROR_ACCESS_TIMEOUT_MS")?);
        }
        if let Some(v) = env_var("MIRROR_OVERLAP") {
            cfg.overlap = serde_json::from_value(serde_json::Value::String(v))
                .context("MIRROR_OVERLAP must be catch_up or skip_if_running")?;
        }
        if let Some(v) = env_var("MIRROR_MAX_OUTSTANDING") {
            cfg.max_outstanding_per_mirror = Some(v.parse().context("MIRROR_MAX_OUTSTANDING")?);
        }

        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
