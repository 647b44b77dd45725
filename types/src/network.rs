//! Settlement network identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypeError;

/// Identifies which settlement network a pool's payment contract lives on.
///
/// The settlement adapter refuses to start when the authority's reported
/// chain id does not map back to the configured network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Mainnet,
    /// The public test network.
    Testnet,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Human-readable name, as used in config files and contract URIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Dev => "dev",
        }
    }

    /// Chain id reported by an authority node on this network.
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Testnet => 11155111,
            Self::Dev => 1337,
        }
    }

    /// Map an authority's reported chain id back to a network.
    pub fn from_chain_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Self::Mainnet),
            11155111 => Some(Self::Testnet),
            1337 => Some(Self::Dev),
            _ => None,
        }
    }
}

impl FromStr for NetworkId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "live" => Ok(Self::Mainnet),
            "testnet" | "test" => Ok(Self::Testnet),
            "dev" => Ok(Self::Dev),
            other => Err(TypeError::InvalidNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
