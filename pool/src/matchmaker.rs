//! Host selection for client requests.

use std::sync::Arc;

use peerpool_store::{Node, NodeStore, Store};
use peerpool_types::Timestamp;

use crate::PoolError;

/// How many hosts a client gets when it doesn't ask for a number.
pub const DEFAULT_REQUEST_HOSTS: usize = 3;

/// Pool-wide ceiling on hosts per request, preventing a single client
/// from enumerating or monopolising the pool.
pub const DEFAULT_MAX_REQUEST_HOSTS: usize = 10;

/// Selects a bounded set of live hosts of a requested kind.
///
/// Liveness weighting and tie-breaking live in the store's
/// `active_hosts` query; this layer only applies the request caps.
#[derive(Clone, Debug)]
pub struct Matchmaker {
    pub max_request_hosts: usize,
    pub default_hosts: usize,
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self {
            max_request_hosts: DEFAULT_MAX_REQUEST_HOSTS,
            default_hosts: DEFAULT_REQUEST_HOSTS,
        }
    }
}

impl Matchmaker {
    pub fn select(
        &self,
        store: &Arc<dyn Store>,
        kind: &str,
        num_hosts: usize,
        now: Timestamp,
    ) -> Result<Vec<Node>, PoolError> {
        let requested = if num_hosts == 0 {
            self.default_hosts
        } else {
            num_hosts
        };
        let limit = requested.min(self.max_request_hosts);
        Ok(store.active_hosts(kind, limit, now)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerpool_store::Node;
    use peerpool_store::NodeStore;
    use peerpool_store_memory::MemoryStore;
    use peerpool_types::{Account, NodeId};

    fn pool_with_hosts(geth: usize, parity: usize) -> Arc<dyn Store> {
        let store = MemoryStore::new();
        for i in 0..geth {
            let node = Node::new(
                NodeId::new(format!("g{i}")),
                format!("enode://g{i}@10.0.0.{i}:30303"),
                "geth".to_string(),
                true,
                Timestamp::from_secs(1_000 - i as u64),
            );
            store.set_node(&node, &Account::anonymous()).expect("set");
        }
        for i in 0..parity {
            let node = Node::new(
                NodeId::new(format!("p{i}")),
                format!("enode://p{i}@10.0.1.{i}:30303"),
                "parity".to_string(),
                true,
                Timestamp::from_secs(1_000),
            );
            store.set_node(&node, &Account::anonymous()).expect("set");
        }
        Arc::new(store)
    }

    #[test]
    fn requested_count_is_honored_and_sorted_by_last_seen() {
        let store = pool_with_hosts(5, 2);
        let matchmaker = Matchmaker::default();
        let hosts = matchmaker
            .select(&store, "geth", 3, Timestamp::from_secs(1_000))
            .expect("select");
        assert_eq!(hosts.len(), 3);
        let ids: Vec<_> = hosts.iter().map(|n| n.id.as_str().to_string()).collect();
        assert_eq!(ids, ["g0", "g1", "g2"]);
        assert!(hosts.iter().all(|n| n.kind == "geth"));
    }

    #[test]
    fn zero_request_uses_the_default() {
        let store = pool_with_hosts(5, 0);
        let matchmaker = Matchmaker::default();
        let hosts = matchmaker
            .select(&store, "geth", 0, Timestamp::from_secs(1_000))
            .expect("select");
        assert_eq!(hosts.len(), DEFAULT_REQUEST_HOSTS);
    }

    #[test]
    fn greedy_requests_hit_the_pool_ceiling() {
        let store = pool_with_hosts(5, 0);
        let matchmaker = Matchmaker {
            max_request_hosts: 4,
            default_hosts: DEFAULT_REQUEST_HOSTS,
        };
        let hosts = matchmaker
            .select(&store, "geth", 99, Timestamp::from_secs(1_000))
            .expect("select");
        assert_eq!(hosts.len(), 4);
    }

    #[test]
    fn small_pools_return_what_they_have() {
        let store = pool_with_hosts(0, 2);
        let matchmaker = Matchmaker::default();
        let hosts = matchmaker
            .select(&store, "parity", 8, Timestamp::from_secs(1_000))
            .expect("select");
        assert_eq!(hosts.len(), 2);
        assert!(matchmaker
            .select(&store, "geth", 8, Timestamp::from_secs(1_000))
            .expect("select")
            .is_empty());
    }
}
