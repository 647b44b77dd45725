//! JSON-RPC error codes for pool error kinds.

use peerpool_core::PoolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("server error: {0}")]
    Server(String),
}

/// Application code for a pool error kind. Clients branch on these;
/// messages and remediation text are advisory.
pub fn error_code(err: &PoolError) -> i32 {
    match err {
        PoolError::StaleNonce { .. } => -32001,
        PoolError::BadSignature(_) => -32002,
        PoolError::NotFound(_) => -32003,
        PoolError::InvalidRequest(_) => -32004,
        PoolError::InvalidKind(_) => -32005,
        PoolError::InsufficientBalance(_) => -32010,
        PoolError::NotSupported(_) => -32020,
        PoolError::NetworkMismatch { .. } => -32021,
        PoolError::AddressMismatch { .. } => -32022,
        PoolError::TransientRpc(_) => -32023,
        PoolError::Keystore(_) | PoolError::Config(_) => -32024,
        PoolError::Storage(_) => -32030,
    }
}
