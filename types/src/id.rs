//! Node and account identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::keys::PublicKey;
use crate::TypeError;

/// Identifier of a peer endpoint, derived from its long-term public key.
///
/// The canonical form is lowercase; construction normalises, so two ids
/// that differ only in case compare equal everywhere in the pool.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    /// The canonical id of a public key: its lowercase hex encoding.
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(key.to_hex())
    }

    /// Parse the id back into the public key it was derived from.
    ///
    /// Fails for ids that are not 64 hex characters (e.g. test fixtures).
    pub fn public_key(&self) -> Result<PublicKey, TypeError> {
        self.0.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a payout wallet.
///
/// The empty account is "anonymous": balances for anonymous nodes are
/// tracked per node via [`Account::node_scoped`] rather than pooled.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(account: impl Into<String>) -> Self {
        Self(account.into())
    }

    pub fn anonymous() -> Self {
        Self(String::new())
    }

    /// The per-node billing account used when a node has no payout wallet.
    pub fn node_scoped(id: &NodeId) -> Self {
        Self(format!("node:{id}"))
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(anonymous)")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for Account {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
