//! Pay-per-interval billing.
//!
//! Billing rides on the keepalive cadence: every authenticated update is
//! a billing opportunity, and an endpoint that goes quiet stops billing
//! by construction. Credit only moves along corroborated edges, peerings
//! attested by both endpoints within the keepalive window, so neither
//! side can unilaterally claim (or foist) a paid peering.

use std::sync::Arc;

use tracing::debug;

use peerpool_store::{Balance, BalanceStore, Node, Store, KEEPALIVE_INTERVAL_SECS};
use peerpool_types::{Amount, NodeId, Timestamp};

use crate::PoolError;

/// Billing policy: every elapsed keepalive interval of a corroborated
/// client↔host peering moves `credit_per_interval` from the client's
/// account to the host's.
///
/// Transfers execute on the client's update only. A host's update keeps
/// its side of the corroboration fresh but moves no credit; otherwise a
/// peering billed from both ends would move double the configured rate.
pub struct PayPerInterval {
    nodes: Arc<dyn Store>,
    balances: Arc<dyn BalanceStore>,
    interval_secs: u64,
    credit_per_interval: Amount,
    /// When set, a client whose credit drops below this after billing
    /// gets an `InsufficientBalance` signal. Hosts are never rejected.
    pub min_balance: Option<Amount>,
}

impl PayPerInterval {
    pub fn new(
        nodes: Arc<dyn Store>,
        balances: Arc<dyn BalanceStore>,
        credit_per_interval: Amount,
    ) -> Self {
        Self {
            nodes,
            balances,
            interval_secs: KEEPALIVE_INTERVAL_SECS,
            credit_per_interval,
            min_balance: None,
        }
    }

    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    /// Settle the billing consequences of one authenticated update.
    ///
    /// `node` is the caller's record as it stood *before* this update
    /// refreshed `last_seen`; that previous timestamp is the billing
    /// anchor. `peers` is the peer set the caller just declared.
    pub fn on_peers(
        &self,
        node: &Node,
        peers: &[NodeId],
        now: Timestamp,
    ) -> Result<Balance, PoolError> {
        let intervals = now.since(node.last_seen) / self.interval_secs;

        if intervals > 0 && !node.is_host {
            let amount = self
                .credit_per_interval
                .checked_mul(intervals as i128)
                .ok_or_else(|| PoolError::InvalidRequest("billing amount overflow".into()))?;
            let client_account = self.nodes.billing_account(&node.id)?;

            for peer_id in peers {
                let Some(peer) = self.nodes.get_node(peer_id)? else {
                    // Unregistered peers never corroborate; nothing to bill.
                    continue;
                };
                if !peer.is_host || !peer.attests(&node.id, now) {
                    continue;
                }
                let host_account = self.nodes.billing_account(&peer.id)?;
                self.balances.add_balance(&host_account, amount)?;
                self.balances.add_balance(&client_account, -amount)?;
                debug!(
                    client = %node.id,
                    host = %peer.id,
                    %amount,
                    intervals,
                    "billed corroborated peering"
                );
            }
        }

        let balance = self
            .balances
            .get_balance(&self.nodes.billing_account(&node.id)?)?;

        if let Some(min) = self.min_balance {
            if !node.is_host && balance.credit < min {
                return Err(PoolError::InsufficientBalance(balance));
            }
        }
        Ok(balance)
    }
}
