//! JSON-RPC surface for the peerpool node pool.
//!
//! Requests arrive as JSON-RPC 2.0 over HTTP POST. Every method except
//! `pool_status` is authenticated: the params object carries the
//! caller's node id, a strictly-increasing nonce, and an Ed25519
//! signature over (method, nonce, params). Nonce verification precedes
//! dispatch, so a replayed request dies before it can touch the pool.

pub mod envelope;
pub mod error;
pub mod server;

pub use error::RpcError;
pub use server::{router, RpcState};
