//! Mirror registry backends.

pub mod memory;

pub use memory::InMemoryMirrorRegistry;
