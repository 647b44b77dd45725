//! Withdrawal requests, proxied to the settlement adapter.

use std::sync::Arc;
use tracing::{error, info};

use peerpool_store::{BalanceStore, Store};
use peerpool_types::{Amount, Clock, NodeId};

use crate::requests::WithdrawResponse;
use crate::settlement::ContractSettlement;
use crate::PoolError;

/// Pool payment service: turns a node's accrued credit into a settlement
/// on the external authority.
pub struct PaymentService {
    store: Arc<dyn Store>,
    balances: Arc<dyn BalanceStore>,
    settlement: Option<Arc<ContractSettlement>>,
    /// Smallest withdrawable gross amount; keeps settlements worth their
    /// authority fees.
    pub withdraw_min: Amount,
    /// Flat fee subtracted from the payout.
    pub withdraw_fee: Amount,
    /// Seconds between settlement attempts per account.
    pub withdraw_cooldown_secs: u64,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn Store>,
        balances: Arc<dyn BalanceStore>,
        settlement: Option<Arc<ContractSettlement>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            balances,
            settlement,
            // TODO: derive the fee from the authority's current gas price
            // instead of a flat amount.
            withdraw_min: Amount::from_raw(5_000_000_000_000_000),
            withdraw_fee: Amount::from_raw(2_500_000_000_000_000),
            withdraw_cooldown_secs: 3_600,
            clock,
        }
    }

    /// Withdraw `amount` (gross) of the caller's credit.
    ///
    /// The debit and the settlement succeed or fail together: a failed
    /// settlement rolls the debit back. A rollback that itself fails is
    /// logged loudly and surfaced; that balance needs operator
    /// attention.
    pub async fn withdraw(
        &self,
        caller: &NodeId,
        amount: Amount,
    ) -> Result<WithdrawResponse, PoolError> {
        let Some(settlement) = &self.settlement else {
            return Err(PoolError::NotSupported(
                "this pool runs without a settlement contract".into(),
            ));
        };

        let account = self.store.billing_account(caller)?;
        let now = self.clock.now();
        let balance = self.balances.get_balance(&account)?;

        if now < balance.next_withdraw {
            return Err(PoolError::InvalidRequest(format!(
                "withdraw rate limited until {}",
                balance.next_withdraw
            )));
        }
        if amount < self.withdraw_min {
            return Err(PoolError::InvalidRequest(format!(
                "withdraw amount {amount} below minimum {}",
                self.withdraw_min
            )));
        }
        if balance.credit < amount {
            return Err(PoolError::InsufficientBalance(balance));
        }
        let payout = amount
            .checked_sub(self.withdraw_fee)
            .filter(|p| !p.is_negative() && !p.is_zero())
            .ok_or_else(|| {
                PoolError::InvalidRequest(format!(
                    "withdraw amount {amount} does not cover the {} fee",
                    self.withdraw_fee
                ))
            })?;

        // Debit the gross amount and advance the gate before touching the
        // authority; a settlement failure reverses both.
        self.balances.add_balance(&account, -amount)?;
        self.balances
            .set_next_withdraw(&account, now.after(self.withdraw_cooldown_secs))?;

        match settlement.settle(&account, payout).await {
            Ok(tx) => {
                info!(%account, %amount, %payout, %tx, "withdrawal settled");
                Ok(WithdrawResponse {
                    tx: Some(tx),
                    settled_amount: payout,
                })
            }
            Err(err) => {
                if let Err(rollback) = self.balances.add_balance(&account, amount) {
                    error!(
                        %account, %amount, error = %rollback,
                        "failed to roll back debit after settlement failure; \
                         ledger is inconsistent"
                    );
                    return Err(rollback.into());
                }
                if let Err(rollback) = self
                    .balances
                    .set_next_withdraw(&account, balance.next_withdraw)
                {
                    error!(%account, error = %rollback, "failed to restore withdraw gate");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::tests::{operator, MockAuthority};
    use crate::settlement::ContractSettlement;
    use peerpool_store::{Node, NodeStore};
    use peerpool_store_memory::MemoryStore;
    use peerpool_types::{Account, ManualClock, NetworkId, Timestamp};

    const GROSS: i128 = 10_000_000_000_000_000; // 0.01 units
    const FEE: i128 = 2_500_000_000_000_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        authority: Arc<MockAuthority>,
        clock: Arc<ManualClock>,
        service: PaymentService,
    }

    async fn fixture(with_settlement: bool) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(50_000));
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            &operator().address().to_string(),
        ));
        let settlement = if with_settlement {
            Some(Arc::new(
                ContractSettlement::connect(
                    store.clone() as Arc<dyn BalanceStore>,
                    authority.clone(),
                    "0xC0FFEE".to_string(),
                    NetworkId::Dev,
                    Some(operator()),
                )
                .await
                .expect("connect"),
            ))
        } else {
            None
        };
        let service = PaymentService::new(
            store.clone() as Arc<dyn Store>,
            store.clone() as Arc<dyn BalanceStore>,
            settlement,
            clock.clone(),
        );

        // One registered host bound to a payout wallet, with credit.
        let node = Node::new(
            NodeId::new("h1"),
            "enode://h1@10.0.0.1:30303".to_string(),
            "geth".to_string(),
            true,
            Timestamp::from_secs(50_000),
        );
        store.set_node(&node, &Account::new("0xAAA")).expect("set");
        store
            .add_balance(&Account::new("0xAAA"), Amount::from_raw(5 * GROSS))
            .expect("fund");

        Fixture {
            store,
            authority,
            clock,
            service,
        }
    }

    fn credit(fx: &Fixture) -> i128 {
        fx.store
            .get_balance(&Account::new("0xAAA"))
            .expect("balance")
            .credit
            .raw()
    }

    #[tokio::test]
    async fn withdraw_debits_gross_and_settles_net() {
        let fx = fixture(true).await;
        let resp = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect("withdraw");
        assert_eq!(resp.settled_amount, Amount::from_raw(GROSS - FEE));
        assert!(resp.tx.is_some());
        assert_eq!(credit(&fx), 4 * GROSS);

        let submitted = fx.authority.submitted.lock().unwrap();
        assert_eq!(submitted[0].amount, Amount::from_raw(GROSS - FEE));
    }

    #[tokio::test]
    async fn failed_settlement_rolls_the_debit_back() {
        // S6: the authority fails the submit twice (initial + retry);
        // the store must show zero net change.
        let fx = fixture(true).await;
        *fx.authority.submit_failures.lock().unwrap() = 2;

        let err = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect_err("settlement failed");
        assert!(matches!(err, PoolError::TransientRpc(_)));
        assert_eq!(credit(&fx), 5 * GROSS);

        // The withdraw gate was restored too: an immediate retry is not
        // rate limited.
        *fx.authority.submit_failures.lock().unwrap() = 0;
        fx.service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect("retry after rollback");
    }

    #[tokio::test]
    async fn withdraw_without_settlement_is_not_supported() {
        let fx = fixture(false).await;
        let err = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect_err("no contract");
        assert!(matches!(err, PoolError::NotSupported(_)));
        assert!(err.remediation().is_some());
    }

    #[tokio::test]
    async fn below_minimum_is_rejected() {
        let fx = fixture(true).await;
        let err = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(1_000))
            .await
            .expect_err("below minimum");
        assert!(matches!(err, PoolError::InvalidRequest(_)));
        assert_eq!(credit(&fx), 5 * GROSS);
    }

    #[tokio::test]
    async fn overdrawing_reports_the_balance() {
        let fx = fixture(true).await;
        let err = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(50 * GROSS))
            .await
            .expect_err("overdraw");
        match err {
            PoolError::InsufficientBalance(balance) => {
                assert_eq!(balance.credit, Amount::from_raw(5 * GROSS));
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successive_withdrawals_are_rate_limited() {
        let fx = fixture(true).await;
        fx.service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect("first");
        let err = fx
            .service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect_err("gated");
        assert!(matches!(err, PoolError::InvalidRequest(_)));

        fx.clock.advance(3_600);
        fx.service
            .withdraw(&NodeId::new("h1"), Amount::from_raw(GROSS))
            .await
            .expect("after cooldown");
    }
}
