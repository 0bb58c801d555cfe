//! Dedicated threads with a single-threaded tokio runtime each.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::runtime::Runtime;
use tracing::{debug, error};

/// Counter of threads spawned through [`spawn_runtime_thread`] that have not exited yet.
#[derive(Debug, Clone, Default)]
pub struct LiveThreads(Arc<AtomicUsize>);

impl LiveThreads {
    /// New counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads currently alive.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn enter(&self) -> LiveGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        LiveGuard(Arc::clone(&self.0))
    }
}

/// Decrements the live counter when the thread body finishes, panics included.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Spawn a named OS thread that builds its own current-thread tokio runtime
/// and hands it to `body`.
///
/// The thread is counted in `live` from before it starts until `body`
/// returns and the runtime is dropped, so after joining the handle the
/// counter no longer includes it.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_runtime_thread<F>(
    name: String,
    stack_size: usize,
    live: &LiveThreads,
    body: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce(&Runtime) + Send + 'static,
{
    let guard = live.enter();
    thread::Builder::new()
        .name(name)
        .stack_size(stack_size)
        .spawn(move || {
            let _guard = guard;
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to create thread runtime");
                    return;
                }
            };
            body(&rt);
            drop(rt);
            debug!("runtime thread exiting");
        })
}
