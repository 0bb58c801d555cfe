//! Runtime adapters: dedicated OS threads that each drive their own tokio runtime.

pub mod thread;

pub use thread::{spawn_runtime_thread, LiveThreads};
