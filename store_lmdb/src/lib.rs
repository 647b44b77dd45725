//! LMDB storage backend for the peerpool node pool.
//!
//! Implements the `peerpool-store` traits with the `heed` LMDB bindings.
//! Node and balance values are JSON documents so the layout stays
//! self-describing, and unknown fields written by newer versions are
//! preserved across read-modify-write cycles. Peer attestations live in
//! their own database under `<owner>/<peer>` composite keys; every
//! multi-key mutation happens inside a single write transaction.

pub mod environment;
pub mod error;
pub mod store;

pub use environment::LmdbEnvironment;
pub use error::LmdbError;
pub use store::LmdbStore;
