//! Access policy backends.

pub mod memory;

pub use memory::InMemoryAccessController;
