//! LMDB implementation of the pool storage traits.

use std::collections::HashMap;
use std::path::Path;

use heed::{RoTxn, RwTxn};
use serde::{Deserialize, Serialize};

use peerpool_store::node::host_selection_order;
use peerpool_store::{Balance, BalanceStore, Node, NodeStore, NonceStore, StoreError};
use peerpool_types::{Account, Amount, NodeId, Timestamp};

use crate::{LmdbEnvironment, LmdbError};

/// Persistent pool store backed by a single LMDB environment.
pub struct LmdbStore {
    env: LmdbEnvironment,
}

/// Node record as persisted. Peers are kept out of the document (they
/// live under composite keys in the peers database); the flatten map
/// carries any fields a newer version may have written.
#[derive(Serialize, Deserialize)]
struct StoredNode {
    uri: String,
    kind: String,
    is_host: bool,
    in_sync: bool,
    last_seen: u64,
    #[serde(default)]
    account: Account,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct StoredBalance {
    credit: Amount,
    next_withdraw: u64,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

fn peer_key(owner: &NodeId, peer: &NodeId) -> Vec<u8> {
    format!("{owner}/{peer}").into_bytes()
}

fn peer_prefix(owner: &NodeId) -> Vec<u8> {
    format!("{owner}/").into_bytes()
}

fn u64_from_bytes(bytes: &[u8], what: &str) -> Result<u64, LmdbError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbError::Serialization(format!("{what}: expected 8 bytes")))?;
    Ok(u64::from_be_bytes(arr))
}

impl LmdbStore {
    /// Open or create a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self, LmdbError> {
        Ok(Self {
            env: LmdbEnvironment::open(path)?,
        })
    }

    pub fn environment(&self) -> &LmdbEnvironment {
        &self.env
    }

    fn read_stored_node(&self, txn: &RoTxn, id: &NodeId) -> Result<Option<StoredNode>, LmdbError> {
        match self.env.nodes_db.get(txn, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn read_peers(
        &self,
        txn: &RoTxn,
        id: &NodeId,
    ) -> Result<HashMap<NodeId, Timestamp>, LmdbError> {
        let prefix = peer_prefix(id);
        let mut peers = HashMap::new();
        for entry in self.env.peers_db.prefix_iter(txn, &prefix)? {
            let (key, value) = entry?;
            let peer = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|_| LmdbError::Serialization("non-utf8 peer key".to_string()))?;
            let seen = u64_from_bytes(value, "peer timestamp")?;
            peers.insert(NodeId::new(peer), Timestamp::from_secs(seen));
        }
        Ok(peers)
    }

    fn assemble_node(&self, txn: &RoTxn, id: &NodeId) -> Result<Option<Node>, LmdbError> {
        let Some(stored) = self.read_stored_node(txn, id)? else {
            return Ok(None);
        };
        let peers = self.read_peers(txn, id)?;
        Ok(Some(Node {
            id: id.clone(),
            uri: stored.uri,
            kind: stored.kind,
            is_host: stored.is_host,
            in_sync: stored.in_sync,
            last_seen: Timestamp::from_secs(stored.last_seen),
            peers,
        }))
    }

    fn write_own_peers(
        &self,
        wtxn: &mut RwTxn,
        id: &NodeId,
        peers: &HashMap<NodeId, Timestamp>,
    ) -> Result<(), LmdbError> {
        let prefix = peer_prefix(id);
        let stale: Vec<Vec<u8>> = self
            .env
            .peers_db
            .prefix_iter(wtxn, &prefix)?
            .map(|entry| entry.map(|(k, _)| k.to_vec()))
            .collect::<Result<_, _>>()?;
        for key in stale {
            self.env.peers_db.delete(wtxn, &key)?;
        }
        for (peer, seen) in peers {
            self.env
                .peers_db
                .put(wtxn, &peer_key(id, peer), &seen.secs().to_be_bytes())?;
        }
        Ok(())
    }

    /// Delete a node's record, its own attestations, and every reverse
    /// attestation pointing at it. Caller owns the transaction, so a
    /// multi-node purge commits as one batch.
    fn purge_node_txn(&self, wtxn: &mut RwTxn, id: &NodeId) -> Result<(), LmdbError> {
        self.env.nodes_db.delete(wtxn, id.as_str().as_bytes())?;

        let prefix = peer_prefix(id);
        let mut doomed: Vec<Vec<u8>> = self
            .env
            .peers_db
            .prefix_iter(wtxn, &prefix)?
            .map(|entry| entry.map(|(k, _)| k.to_vec()))
            .collect::<Result<_, _>>()?;

        let reverse_suffix = format!("/{id}").into_bytes();
        for entry in self.env.peers_db.iter(wtxn)? {
            let (key, _) = entry?;
            if key.ends_with(&reverse_suffix) {
                doomed.push(key.to_vec());
            }
        }
        for key in doomed {
            self.env.peers_db.delete(wtxn, &key)?;
        }
        Ok(())
    }

    fn read_stored_balance(
        &self,
        txn: &RoTxn,
        account: &Account,
    ) -> Result<Option<StoredBalance>, LmdbError> {
        match self.env.balances_db.get(txn, account.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn write_stored_balance(
        &self,
        wtxn: &mut RwTxn,
        account: &Account,
        stored: &StoredBalance,
    ) -> Result<(), LmdbError> {
        let bytes = serde_json::to_vec(stored)?;
        self.env
            .balances_db
            .put(wtxn, account.as_str().as_bytes(), &bytes)?;
        Ok(())
    }
}

impl NonceStore for LmdbStore {
    fn check_and_save_nonce(&self, id: &NodeId, nonce: u64) -> Result<(), StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        let latest = match self
            .env
            .nonces_db
            .get(&wtxn, id.as_str().as_bytes())
            .map_err(LmdbError::from)?
        {
            Some(bytes) => u64_from_bytes(bytes, "nonce")?,
            None => 0,
        };
        if nonce <= latest {
            return Err(StoreError::StaleNonce {
                node: id.clone(),
                presented: nonce,
                latest,
            });
        }
        self.env
            .nonces_db
            .put(&mut wtxn, id.as_str().as_bytes(), &nonce.to_be_bytes())
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

impl BalanceStore for LmdbStore {
    fn get_balance(&self, account: &Account) -> Result<Balance, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        match self.read_stored_balance(&rtxn, account)? {
            Some(stored) => Ok(Balance {
                account: account.clone(),
                credit: stored.credit,
                next_withdraw: Timestamp::from_secs(stored.next_withdraw),
            }),
            None => Ok(Balance::empty(account.clone())),
        }
    }

    fn add_balance(&self, account: &Account, delta: Amount) -> Result<Balance, StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        let mut stored = self
            .read_stored_balance(&wtxn, account)?
            .unwrap_or_else(|| StoredBalance {
                credit: Amount::ZERO,
                next_withdraw: 0,
                extra: serde_json::Map::new(),
            });
        stored.credit = stored
            .credit
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(format!("credit overflow for {account}")))?;
        self.write_stored_balance(&mut wtxn, account, &stored)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Balance {
            account: account.clone(),
            credit: stored.credit,
            next_withdraw: Timestamp::from_secs(stored.next_withdraw),
        })
    }

    fn set_next_withdraw(&self, account: &Account, at: Timestamp) -> Result<(), StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        let mut stored = self
            .read_stored_balance(&wtxn, account)?
            .unwrap_or_else(|| StoredBalance {
                credit: Amount::ZERO,
                next_withdraw: 0,
                extra: serde_json::Map::new(),
            });
        stored.next_withdraw = at.secs();
        self.write_stored_balance(&mut wtxn, account, &stored)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn total_balance(&self) -> Result<Amount, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        let mut total = Amount::ZERO;
        for entry in self.env.balances_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (_, bytes) = entry.map_err(LmdbError::from)?;
            let stored: StoredBalance =
                serde_json::from_slice(bytes).map_err(LmdbError::from)?;
            total = total
                .checked_add(stored.credit)
                .ok_or_else(|| StoreError::Backend("total balance overflow".to_string()))?;
        }
        Ok(total)
    }
}

impl NodeStore for LmdbStore {
    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        Ok(self.assemble_node(&rtxn, id)?)
    }

    fn set_node(&self, node: &Node, account: &Account) -> Result<(), StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        // Read-modify-write so fields from newer versions survive.
        let extra = self
            .read_stored_node(&wtxn, &node.id)?
            .map(|existing| existing.extra)
            .unwrap_or_default();
        let stored = StoredNode {
            uri: node.uri.clone(),
            kind: node.kind.clone(),
            is_host: node.is_host,
            in_sync: node.in_sync,
            last_seen: node.last_seen.secs(),
            account: account.clone(),
            extra,
        };
        let bytes = serde_json::to_vec(&stored).map_err(LmdbError::from)?;
        self.env
            .nodes_db
            .put(&mut wtxn, node.id.as_str().as_bytes(), &bytes)
            .map_err(LmdbError::from)?;
        self.write_own_peers(&mut wtxn, &node.id, &node.peers)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        if self.read_stored_node(&wtxn, id)?.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.purge_node_txn(&mut wtxn, id)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }

    fn active_hosts(
        &self,
        kind: &str,
        limit: usize,
        now: Timestamp,
    ) -> Result<Vec<Node>, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        let mut hosts = Vec::new();
        for entry in self.env.nodes_db.iter(&rtxn).map_err(LmdbError::from)? {
            let (key, bytes) = entry.map_err(LmdbError::from)?;
            let stored: StoredNode = serde_json::from_slice(bytes).map_err(LmdbError::from)?;
            if !stored.is_host || !stored.in_sync {
                continue;
            }
            if !kind.is_empty() && stored.kind != kind {
                continue;
            }
            let id = std::str::from_utf8(key)
                .map_err(|_| LmdbError::Serialization("non-utf8 node key".to_string()))?;
            let node = Node {
                id: NodeId::new(id),
                uri: stored.uri,
                kind: stored.kind,
                is_host: stored.is_host,
                in_sync: stored.in_sync,
                last_seen: Timestamp::from_secs(stored.last_seen),
                peers: HashMap::new(),
            };
            if node.is_active(now) {
                hosts.push(node);
            }
        }
        hosts.sort_by(host_selection_order);
        hosts.truncate(limit);
        // Only the selected few get their peer sets materialised.
        for node in &mut hosts {
            node.peers = self.read_peers(&rtxn, &node.id)?;
        }
        Ok(hosts)
    }

    fn update_node_peers(
        &self,
        id: &NodeId,
        peers: &[NodeId],
        in_sync: bool,
        now: Timestamp,
    ) -> Result<Vec<Node>, StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        let mut stored = self
            .read_stored_node(&wtxn, id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let old = self.read_peers(&wtxn, id)?;
        let new_peers: HashMap<NodeId, Timestamp> =
            peers.iter().map(|p| (p.clone(), now)).collect();
        let dropped: Vec<NodeId> = old
            .keys()
            .filter(|p| !new_peers.contains_key(*p))
            .cloned()
            .collect();

        self.write_own_peers(&mut wtxn, id, &new_peers)?;

        stored.last_seen = now.secs();
        stored.in_sync = in_sync;
        let bytes = serde_json::to_vec(&stored).map_err(LmdbError::from)?;
        self.env
            .nodes_db
            .put(&mut wtxn, id.as_str().as_bytes(), &bytes)
            .map_err(LmdbError::from)?;

        let mut inactive = Vec::new();
        for peer in &dropped {
            if let Some(node) = self.assemble_node(&wtxn, peer)? {
                inactive.push(node);
            }
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(inactive)
    }

    fn billing_account(&self, id: &NodeId) -> Result<Account, StoreError> {
        let rtxn = self.env.env().read_txn().map_err(LmdbError::from)?;
        let stored = self
            .read_stored_node(&rtxn, id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if stored.account.is_anonymous() {
            Ok(Account::node_scoped(id))
        } else {
            Ok(stored.account)
        }
    }

    fn purge_inactive(&self, cutoff_secs: u64, now: Timestamp) -> Result<usize, StoreError> {
        let mut wtxn = self.env.env().write_txn().map_err(LmdbError::from)?;
        let mut stale = Vec::new();
        for entry in self.env.nodes_db.iter(&wtxn).map_err(LmdbError::from)? {
            let (key, bytes) = entry.map_err(LmdbError::from)?;
            let stored: StoredNode = serde_json::from_slice(bytes).map_err(LmdbError::from)?;
            if now.since(Timestamp::from_secs(stored.last_seen)) >= cutoff_secs {
                let id = std::str::from_utf8(key)
                    .map_err(|_| LmdbError::Serialization("non-utf8 node key".to_string()))?;
                stale.push(NodeId::new(id));
            }
        }
        for id in &stale {
            self.purge_node_txn(&mut wtxn, id)?;
        }
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(stale.len())
    }
}
