//! In-memory storage backend.
//!
//! A single mutex guards all state, which keeps every multi-key operation
//! trivially atomic. Nothing survives a restart; pools that need
//! durability use the LMDB backend instead.

use std::collections::HashMap;
use std::sync::Mutex;

use peerpool_store::node::host_selection_order;
use peerpool_store::{Balance, BalanceStore, Node, NodeStore, NonceStore, StoreError};
use peerpool_types::{Account, Amount, NodeId, Timestamp};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    /// Payout account bound per node; absent or empty means anonymous.
    accounts: HashMap<NodeId, Account>,
    balances: HashMap<Account, Balance>,
    nonces: HashMap<NodeId, u64>,
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn purge_node(&mut self, id: &NodeId) {
        self.nodes.remove(id);
        self.accounts.remove(id);
        for node in self.nodes.values_mut() {
            node.peers.remove(id);
        }
    }
}

impl NonceStore for MemoryStore {
    fn check_and_save_nonce(&self, id: &NodeId, nonce: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let latest = inner.nonces.entry(id.clone()).or_insert(0);
        if nonce > *latest {
            *latest = nonce;
            Ok(())
        } else {
            Err(StoreError::StaleNonce {
                node: id.clone(),
                presented: nonce,
                latest: *latest,
            })
        }
    }
}

impl BalanceStore for MemoryStore {
    fn get_balance(&self, account: &Account) -> Result<Balance, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .balances
            .get(account)
            .cloned()
            .unwrap_or_else(|| Balance::empty(account.clone())))
    }

    fn add_balance(&self, account: &Account, delta: Amount) -> Result<Balance, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let balance = inner
            .balances
            .entry(account.clone())
            .or_insert_with(|| Balance::empty(account.clone()));
        balance.credit = balance
            .credit
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(format!("credit overflow for {account}")))?;
        Ok(balance.clone())
    }

    fn set_next_withdraw(&self, account: &Account, at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .balances
            .entry(account.clone())
            .or_insert_with(|| Balance::empty(account.clone()))
            .next_withdraw = at;
        Ok(())
    }

    fn total_balance(&self) -> Result<Amount, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .balances
            .values()
            .try_fold(Amount::ZERO, |sum, b| sum.checked_add(b.credit))
            .ok_or_else(|| StoreError::Backend("total balance overflow".to_string()))
    }
}

impl NodeStore for MemoryStore {
    fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.nodes.get(id).cloned())
    }

    fn set_node(&self, node: &Node, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(node.id.clone(), node.clone());
        inner.accounts.insert(node.id.clone(), account.clone());
        Ok(())
    }

    fn remove_node(&self, id: &NodeId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        inner.purge_node(id);
        Ok(())
    }

    fn active_hosts(
        &self,
        kind: &str,
        limit: usize,
        now: Timestamp,
    ) -> Result<Vec<Node>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut hosts: Vec<Node> = inner
            .nodes
            .values()
            .filter(|n| n.is_host && n.in_sync && n.is_active(now))
            .filter(|n| kind.is_empty() || n.kind == kind)
            .cloned()
            .collect();
        hosts.sort_by(host_selection_order);
        hosts.truncate(limit);
        Ok(hosts)
    }

    fn update_node_peers(
        &self,
        id: &NodeId,
        peers: &[NodeId],
        in_sync: bool,
        now: Timestamp,
    ) -> Result<Vec<Node>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let new_peers: HashMap<NodeId, Timestamp> =
            peers.iter().map(|p| (p.clone(), now)).collect();
        let dropped: Vec<NodeId> = node
            .peers
            .keys()
            .filter(|old| !new_peers.contains_key(*old))
            .cloned()
            .collect();

        node.peers = new_peers;
        node.last_seen = now;
        node.in_sync = in_sync;

        Ok(dropped
            .iter()
            .filter_map(|p| inner.nodes.get(p).cloned())
            .collect())
    }

    fn billing_account(&self, id: &NodeId) -> Result<Account, StoreError> {
        let inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(match inner.accounts.get(id) {
            Some(account) if !account.is_anonymous() => account.clone(),
            _ => Account::node_scoped(id),
        })
    }

    fn purge_inactive(&self, cutoff_secs: u64, now: Timestamp) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<NodeId> = inner
            .nodes
            .values()
            .filter(|n| now.since(n.last_seen) >= cutoff_secs)
            .map(|n| n.id.clone())
            .collect();
        for id in &stale {
            inner.purge_node(id);
        }
        Ok(stale.len())
    }
}
