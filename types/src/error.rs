use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unknown network: {0}")]
    InvalidNetwork(String),
}
