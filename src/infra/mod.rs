//! Infrastructure adapters: in-memory registry, access policy and repository
//! store, plus a filesystem transport.

pub mod access;
pub mod registry;
pub mod storage;
pub mod transport;

pub use access::InMemoryAccessController;
pub use registry::InMemoryMirrorRegistry;
pub use storage::InMemoryRepositoryStore;
pub use transport::LocalDirectoryTransport;
