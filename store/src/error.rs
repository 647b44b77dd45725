use peerpool_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("stale nonce for {node}: presented {presented}, latest {latest}")]
    StaleNonce {
        node: NodeId,
        presented: u64,
        latest: u64,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}
