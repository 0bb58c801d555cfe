//! Mirror transports.

pub mod local;

pub use local::LocalDirectoryTransport;
