use peerpool_store::{Balance, StoreError};
use peerpool_types::{NetworkId, NodeId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("stale nonce for {node}: presented {presented}, latest {latest}")]
    StaleNonce {
        node: NodeId,
        presented: u64,
        latest: u64,
    },

    #[error("bad request signature: {0}")]
    BadSignature(String),

    #[error("unknown node: {0}")]
    NotFound(NodeId),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(Balance),

    #[error("invalid node kind: {0}")]
    InvalidKind(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("settlement network mismatch: configured {configured}, authority reports chain id {reported}")]
    NetworkMismatch {
        configured: NetworkId,
        reported: u64,
    },

    #[error("operator address mismatch: credential {credential}, contract declares {declared}")]
    AddressMismatch {
        credential: String,
        declared: String,
    },

    #[error("settlement authority RPC failed: {0}")]
    TransientRpc(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl PoolError {
    /// Actionable remediation for the operator, kept separate from the
    /// error kind so dashboards and logs can show both.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::NetworkMismatch { .. } => Some(
                "The payment contract and the authority RPC endpoint are on different \
                 networks. Point the pool at an authority node on the same network as \
                 the contract.",
            ),
            Self::AddressMismatch { .. } => Some(
                "The operator keystore must hold the key of the contract's declared \
                 operator. Check that the keystore path points at the correct credential.",
            ),
            Self::NotSupported(_) => Some(
                "Settlement requires a contract and an operator keystore. Start the pool \
                 with both configured to enable withdrawals.",
            ),
            Self::Keystore(_) => Some(
                "Check the keystore path and make sure the decryption passphrase is set \
                 in the POOL_KEYSTORE_PASSPHRASE environment variable.",
            ),
            Self::InsufficientBalance(_) => Some(
                "The account's credit dropped below the pool minimum. Add a deposit with \
                 the pool operator to continue peering.",
            ),
            _ => None,
        }
    }
}

impl From<StoreError> for PoolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaleNonce {
                node,
                presented,
                latest,
            } => Self::StaleNonce {
                node,
                presented,
                latest,
            },
            other => Self::Storage(other),
        }
    }
}
