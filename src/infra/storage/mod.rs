//! Repository store backends.

pub mod memory;

pub use memory::InMemoryRepositoryStore;
