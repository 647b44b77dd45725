//! Pool coordinator: the Host/Client/Update/Disconnect operations.
//!
//! A node's life in the pool is driven entirely by its own calls: it
//! appears on Host/Client, stays live by updating within the keepalive
//! window, and disappears on Disconnect or by falling out of the expiry
//! window. The coordinator itself keeps no per-node state outside the
//! store, so any number of RPC tasks can share one instance.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use peerpool_store::{Store, StoreError};
use peerpool_types::{Account, Clock, NodeId, Timestamp};

use crate::balance::PayPerInterval;
use crate::matchmaker::Matchmaker;
use crate::requests::{
    ClientRequest, ClientResponse, HostInfo, HostRequest, HostResponse, UpdateRequest,
    UpdateResponse,
};
use crate::welcome::WelcomeTemplate;
use crate::PoolError;

/// Port assumed for dial-back when a host registers without an explicit
/// node URI.
pub const DEFAULT_SERVICE_PORT: u16 = 30303;

/// How many blocks a node may trail the best head reported for its kind
/// before it is considered out of sync.
const SYNC_TOLERANCE_BLOCKS: u64 = 3;

const MAX_KIND_LEN: usize = 32;

pub struct Pool {
    store: Arc<dyn Store>,
    balance: PayPerInterval,
    pub matchmaker: Matchmaker,
    pub welcome: WelcomeTemplate,
    pub version: String,
    clock: Arc<dyn Clock>,
    /// Highest block number reported per kind, for sync tracking.
    kind_heads: Mutex<HashMap<String, u64>>,
}

impl Pool {
    pub fn new(store: Arc<dyn Store>, balance: PayPerInterval, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            balance,
            matchmaker: Matchmaker::default(),
            welcome: WelcomeTemplate::default(),
            version: format!("peerpool/{}", env!("CARGO_PKG_VERSION")),
            clock,
            kind_heads: Mutex::new(HashMap::new()),
        }
    }

    /// Register the caller as a host.
    pub fn host(
        &self,
        caller: &NodeId,
        remote_ip: Option<IpAddr>,
        req: HostRequest,
    ) -> Result<HostResponse, PoolError> {
        let kind = validate_kind(&req.kind)?;
        let now = self.clock.now();

        let uri = match req.node_uri {
            Some(uri) if !uri.is_empty() => uri,
            _ => match remote_ip {
                Some(ip) => format!("enode://{caller}@{ip}:{DEFAULT_SERVICE_PORT}"),
                None => {
                    return Err(PoolError::InvalidRequest(
                        "node_uri is required when the remote address is unknown".into(),
                    ))
                }
            },
        };

        let node = self.upsert(caller, uri, kind, true, now)?;
        self.store.set_node(&node, &Account::new(req.payout))?;
        info!(node = %caller, kind = %node.kind, "host registered");
        Ok(HostResponse {
            pool_version: self.version.clone(),
        })
    }

    /// Register the caller as a client and offer it hosts.
    pub fn client(&self, caller: &NodeId, req: ClientRequest) -> Result<ClientResponse, PoolError> {
        let kind = validate_kind(&req.kind)?;
        let now = self.clock.now();

        let node = self.upsert(caller, String::new(), kind, false, now)?;
        self.store.set_node(&node, &Account::anonymous())?;

        let hosts = self
            .matchmaker
            .select(&self.store, &node.kind, req.num_hosts, now)?;
        info!(node = %caller, kind = %node.kind, offered = hosts.len(), "client matched");

        let message = self.welcome.render(caller);
        Ok(ClientResponse {
            hosts: hosts.iter().map(HostInfo::from).collect(),
            pool_version: self.version.clone(),
            message: if message.is_empty() { None } else { Some(message) },
        })
    }

    /// Keepalive: absorb the caller's attested peer set, report peers the
    /// pool no longer considers valid, and bill corroborated peerings.
    pub fn update(&self, caller: &NodeId, req: UpdateRequest) -> Result<UpdateResponse, PoolError> {
        let now = self.clock.now();
        let node = self
            .store
            .get_node(caller)?
            .ok_or_else(|| PoolError::NotFound(caller.clone()))?;

        let peer_ids: Vec<NodeId> = req
            .peers
            .iter()
            .filter_map(|uri| peer_id_from_uri(uri))
            .collect();

        let in_sync = self.note_block_number(&node.kind, req.block_number);
        let inactive = self
            .store
            .update_node_peers(caller, &peer_ids, in_sync, now)?;
        let invalid_peers = inactive
            .into_iter()
            .map(|peer| {
                if peer.uri.is_empty() {
                    peer.id.to_string()
                } else {
                    peer.uri
                }
            })
            .collect();

        // Billing uses the pre-refresh record: its last_seen anchors the
        // elapsed-interval computation.
        match self.balance.on_peers(&node, &peer_ids, now) {
            Ok(balance) => Ok(UpdateResponse {
                balance: Some(balance),
                invalid_peers,
                insufficient_balance: false,
            }),
            Err(PoolError::InsufficientBalance(balance)) => {
                debug!(node = %caller, %balance, "client below minimum balance");
                Ok(UpdateResponse {
                    balance: Some(balance),
                    invalid_peers,
                    insufficient_balance: true,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Stop tracking the caller. Idempotent: disconnecting an unknown
    /// node succeeds, so retries and races are harmless.
    pub fn disconnect(&self, caller: &NodeId) -> Result<(), PoolError> {
        match self.store.remove_node(caller) {
            Ok(()) => {
                info!(node = %caller, "node disconnected");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Build the record to upsert, preserving peers and sync state across
    /// a re-registration. A live record's role is fixed: an id registered
    /// as one role must disconnect (or expire) before taking the other.
    fn upsert(
        &self,
        caller: &NodeId,
        uri: String,
        kind: String,
        is_host: bool,
        now: Timestamp,
    ) -> Result<peerpool_store::Node, PoolError> {
        match self.store.get_node(caller)? {
            Some(existing) => {
                if existing.is_host != is_host && existing.is_active(now) {
                    return Err(PoolError::InvalidRequest(format!(
                        "{caller} is already registered as a {}",
                        if existing.is_host { "host" } else { "client" },
                    )));
                }
                Ok(peerpool_store::Node {
                    uri,
                    kind,
                    is_host,
                    last_seen: now,
                    ..existing
                })
            }
            None => Ok(peerpool_store::Node::new(
                caller.clone(),
                uri,
                kind,
                is_host,
                now,
            )),
        }
    }

    /// Track the best head per kind; a node trailing it by more than the
    /// tolerance is out of sync. Block number 0 means "not reported" and
    /// leaves the node in sync.
    fn note_block_number(&self, kind: &str, block_number: u64) -> bool {
        if block_number == 0 {
            return true;
        }
        let mut heads = self.kind_heads.lock().unwrap();
        let head = heads.entry(kind.to_string()).or_insert(block_number);
        if block_number > *head {
            *head = block_number;
        }
        block_number.saturating_add(SYNC_TOLERANCE_BLOCKS) >= *head
    }
}

fn validate_kind(kind: &str) -> Result<String, PoolError> {
    let kind = kind.trim().to_lowercase();
    if kind.is_empty() || kind.len() > MAX_KIND_LEN {
        return Err(PoolError::InvalidKind(kind));
    }
    if !kind
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(PoolError::InvalidKind(kind));
    }
    Ok(kind)
}

/// Extract the node id from a declared peer URI.
///
/// Accepts full `enode://<id>@host:port` URIs or bare ids. Entries that
/// yield no usable id (empty, or containing a path separator that would
/// corrupt composite store keys) are discarded.
fn peer_id_from_uri(uri: &str) -> Option<NodeId> {
    let rest = uri.split_once("://").map(|(_, r)| r).unwrap_or(uri);
    let id = rest.split_once('@').map(|(id, _)| id).unwrap_or(rest).trim();
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(NodeId::new(id))
    }
}
