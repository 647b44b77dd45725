//! Node records and the node storage trait.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use peerpool_types::{Account, NodeId, Timestamp};

use crate::{StoreError, EXPIRY_FACTOR, KEEPALIVE_INTERVAL_SECS};

/// Metadata tracked for every endpoint registered with the pool.
///
/// `peers` is the set of neighbours this node has attested to, by id and
/// last attestation time, never by reference: the peering graph has no
/// cycles to carry across storage backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Network address for dial-back, e.g. `enode://<id>@10.0.0.1:30303`.
    pub uri: String,
    /// Client implementation family ("geth", "parity", ...).
    pub kind: String,
    /// Hosts serve peers for credit; clients pay for being served.
    /// Fixed for the lifetime of the record.
    pub is_host: bool,
    /// Whether the node tracks the head of its network closely enough to
    /// be useful as a peer.
    pub in_sync: bool,
    pub last_seen: Timestamp,
    pub peers: HashMap<NodeId, Timestamp>,
}

impl Node {
    pub fn new(id: NodeId, uri: String, kind: String, is_host: bool, now: Timestamp) -> Self {
        Self {
            id,
            uri,
            kind,
            is_host,
            in_sync: true,
            last_seen: now,
            peers: HashMap::new(),
        }
    }

    /// Whether this node's last update falls within the expiry window.
    pub fn is_active(&self, now: Timestamp) -> bool {
        now.since(self.last_seen) < EXPIRY_FACTOR * KEEPALIVE_INTERVAL_SECS
    }

    /// Whether this node currently attests a peering with `peer`: the
    /// attestation must be at most one keepalive interval old at `now`.
    pub fn attests(&self, peer: &NodeId, now: Timestamp) -> bool {
        match self.peers.get(peer) {
            Some(seen) => now.since(*seen) <= KEEPALIVE_INTERVAL_SECS,
            None => false,
        }
    }
}

/// Storage of node records, their account bindings, and the peering graph.
pub trait NodeStore: Send + Sync {
    /// Fetch a node record, peers included.
    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError>;

    /// Insert or update a node record and bind it to a payout account.
    /// An empty account leaves the node anonymous.
    fn set_node(&self, node: &Node, account: &Account) -> Result<(), StoreError>;

    /// Delete a node: removes the record, its own peer attestations, and
    /// its entries in every other node's peer set, atomically. Balances
    /// and nonces survive removal. Unknown ids are an error.
    fn remove_node(&self, id: &NodeId) -> Result<(), StoreError>;

    /// Up to `limit` live, in-sync host records of the given kind
    /// (`""` matches all kinds), most recently seen first; ties broken by
    /// id ascending so selection is reproducible.
    fn active_hosts(&self, kind: &str, limit: usize, now: Timestamp)
        -> Result<Vec<Node>, StoreError>;

    /// Replace a node's attested peer set with `peers` (each stamped
    /// `now`), refresh its `last_seen` and `in_sync`, and return the
    /// records of neighbours that were attested before but are no longer.
    /// Dropped neighbours without a record are silently skipped.
    fn update_node_peers(
        &self,
        id: &NodeId,
        peers: &[NodeId],
        in_sync: bool,
        now: Timestamp,
    ) -> Result<Vec<Node>, StoreError>;

    /// The account a node's credit moves through: its bound payout account,
    /// or a node-scoped account if it registered anonymously.
    fn billing_account(&self, id: &NodeId) -> Result<Account, StoreError>;

    /// Remove every node whose `last_seen` is older than `cutoff_secs`,
    /// returning how many were purged. An optional maintenance sweep:
    /// expired nodes are already invisible to matchmaking.
    fn purge_inactive(&self, cutoff_secs: u64, now: Timestamp) -> Result<usize, StoreError>;
}

/// Order host candidates for selection: most recently seen first, then by
/// id so equal timestamps produce a stable order.
pub fn host_selection_order(a: &Node, b: &Node) -> std::cmp::Ordering {
    b.last_seen
        .cmp(&a.last_seen)
        .then_with(|| a.id.cmp(&b.id))
}
