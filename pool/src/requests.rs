//! Request and response shapes for the pool's RPC surface.
//!
//! These are the wire types: field names here are the JSON field names
//! clients see, so renames are protocol changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use peerpool_store::{Balance, Node};
use peerpool_types::Amount;

/// Request type for host registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostRequest {
    /// The node implementation family the host serves: "geth", "parity", ...
    pub kind: String,
    /// Wallet account that host credit accrues to. Empty = anonymous
    /// (credit tracked against the node itself).
    #[serde(default)]
    pub payout: String,
    /// Optional public node URI override, useful when the pool agent runs
    /// on a different address than the served node. Otherwise the pool
    /// derives the URI from the connection's remote address and the
    /// default service port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_uri: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostResponse {
    pub pool_version: String,
}

/// Request type for a client asking the pool for hosts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRequest {
    pub kind: String,
    /// Number of hosts requested; 0 or absent means the pool default.
    #[serde(default)]
    pub num_hosts: usize,
}

/// A host a client may dial.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: String,
    pub uri: String,
    pub kind: String,
}

impl From<&Node> for HostInfo {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.to_string(),
            uri: node.uri.clone(),
            kind: node.kind.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientResponse {
    /// Hosts ready for the client to connect to.
    pub hosts: Vec<HostInfo>,
    pub pool_version: String,
    /// Operator-configured welcome prompt, e.g. a link for managing the
    /// account's deposit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Keepalive request sharing the node's current peering info.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// URIs (or bare ids) of the peers this node is currently serving or
    /// being served by.
    pub peers: Vec<String>,
    /// Head block the node is synced to; 0 when unknown.
    #[serde(default)]
    pub block_number: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Balance>,
    /// Declared peers the pool no longer corroborates; the node should
    /// disconnect them.
    pub invalid_peers: Vec<String>,
    /// Set when a client's credit fell below the pool minimum: the
    /// balance above still applies, but hosts will stop serving soon.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insufficient_balance: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Gross amount to withdraw from pool credit, in raw units.
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawResponse {
    /// Settlement transaction reference, when the authority returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    /// Net amount settled (gross minus the withdrawal fee).
    pub settled_amount: Amount,
}

/// Aggregated pool metrics for dashboards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Active host count by kind.
    pub hosts: BTreeMap<String, u64>,
    pub total_balance: Amount,
    /// Deposits held by the settlement authority; absent for pools
    /// running without a contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deposit: Option<Amount>,
    pub pool_version: String,
    pub uptime_secs: u64,
}
