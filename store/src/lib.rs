//! Abstract storage traits for the peerpool node pool.
//!
//! Every storage backend (LMDB, in-memory) implements these traits. The
//! rest of the codebase depends only on the traits, so the coordinator,
//! matchmaker, and balance manager are stateless given a store handle.

pub mod balance;
pub mod error;
pub mod node;
pub mod nonce;

pub use balance::{Balance, BalanceStore};
pub use error::StoreError;
pub use node::{Node, NodeStore};
pub use nonce::NonceStore;

/// Rate at which clients and hosts are expected to send peering updates.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 60;

/// A node whose last update is older than this multiple of the keepalive
/// interval is expired: excluded from matchmaking and eligible for GC.
pub const EXPIRY_FACTOR: u64 = 2;

/// The full storage capability set required by the pool coordinator.
pub trait Store: NonceStore + BalanceStore + NodeStore {}

impl<T: NonceStore + BalanceStore + NodeStore + ?Sized> Store for T {}
