//! Configuration models for the execution pool and the scheduling service.

pub mod pool;
pub mod scheduling;

pub use pool::ExecutionPoolConfig;
pub use scheduling::{AccessFailurePolicy, OverlapPolicy, SchedulingConfig};
