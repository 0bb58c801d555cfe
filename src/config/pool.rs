//! Execution pool configuration.

use serde::{Deserialize, Serialize};

use super::SchedulingConfig;

/// Execution pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPoolConfig {
    /// Number of worker threads, one run per thread at a time.
    pub worker_count: usize,
    /// Stack size of each worker thread.
    pub thread_stack_size: usize,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
}

impl Default for ExecutionPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "mirror-worker".into(),
        }
    }
}

impl ExecutionPoolConfig {
    /// Configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Pool settings of a scheduling service.
    #[must_use]
    pub fn from_scheduling(cfg: &SchedulingConfig) -> Self {
        Self {
            worker_count: cfg.worker_count,
            thread_stack_size: cfg.thread_stack_size,
            ..Self::default()
        }
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }
}
