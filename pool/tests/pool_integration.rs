//! End-to-end happy path over an in-memory pool: a host and a client
//! register, corroborate their peering across keepalive updates, and the
//! host's payout account earns exactly what the client's account pays.

use std::sync::Arc;

use peerpool_core::balance::PayPerInterval;
use peerpool_core::requests::{ClientRequest, HostRequest, UpdateRequest};
use peerpool_core::Pool;
use peerpool_store::{BalanceStore, Store};
use peerpool_store_memory::MemoryStore;
use peerpool_types::{Account, Amount, ManualClock, NodeId};

const CREDIT_PER_INTERVAL: i128 = 2_000_000_000_000;

fn make_pool() -> (Arc<ManualClock>, Arc<MemoryStore>, Pool) {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let store = Arc::new(MemoryStore::new());
    let nodes: Arc<dyn Store> = store.clone();
    let balance = PayPerInterval::new(
        nodes.clone(),
        store.clone() as Arc<dyn BalanceStore>,
        Amount::from_raw(CREDIT_PER_INTERVAL),
    );
    let pool = Pool::new(nodes, balance, clock.clone());
    (clock, store, pool)
}

#[test]
fn corroborated_peering_bills_client_and_credits_host() {
    let (clock, store, pool) = make_pool();
    let host_id = NodeId::new("aa11");
    let client_id = NodeId::new("cc22");

    pool.host(
        &host_id,
        None,
        HostRequest {
            kind: "geth".to_string(),
            payout: "0xAAA".to_string(),
            node_uri: Some("enode://aa11@192.0.2.10:30303".to_string()),
        },
    )
    .expect("host registration");

    let offer = pool
        .client(
            &client_id,
            ClientRequest {
                kind: "geth".to_string(),
                num_hosts: 0,
            },
        )
        .expect("client registration");
    assert_eq!(offer.hosts.len(), 1);
    assert_eq!(offer.hosts[0].uri, "enode://aa11@192.0.2.10:30303");
    assert!(offer.message.expect("welcome").contains("cc22"));

    // Host attests the client; no interval has elapsed, nothing moves.
    pool.update(
        &host_id,
        UpdateRequest {
            peers: vec!["enode://cc22@198.51.100.4:30303".to_string()],
            block_number: 0,
        },
    )
    .expect("host keepalive");

    // One keepalive later the client attests back: the edge is
    // corroborated and one interval is billed.
    clock.advance(60);
    let resp = pool
        .update(
            &client_id,
            UpdateRequest {
                peers: vec!["enode://aa11@192.0.2.10:30303".to_string()],
                block_number: 0,
            },
        )
        .expect("client keepalive");

    let balance = resp.balance.expect("client balance");
    assert_eq!(balance.credit, Amount::from_raw(-CREDIT_PER_INTERVAL));
    assert!(!resp.insufficient_balance);
    assert!(resp.invalid_peers.is_empty());

    assert_eq!(
        store
            .get_balance(&Account::new("0xAAA"))
            .expect("host payout balance")
            .credit,
        Amount::from_raw(CREDIT_PER_INTERVAL)
    );
    // Pay-per-interval moves credit, never mints it.
    assert_eq!(store.total_balance().expect("total"), Amount::ZERO);

    // The client walks away; the host's next update reports the dropped
    // peer and earns nothing further.
    pool.disconnect(&client_id).expect("disconnect");
    clock.advance(60);
    let resp = pool
        .update(
            &host_id,
            UpdateRequest {
                peers: vec![],
                block_number: 0,
            },
        )
        .expect("host keepalive");
    assert!(resp.invalid_peers.is_empty(), "record is gone, not just inactive");
    assert_eq!(
        store
            .get_balance(&Account::new("0xAAA"))
            .expect("host payout balance")
            .credit,
        Amount::from_raw(CREDIT_PER_INTERVAL)
    );
}
