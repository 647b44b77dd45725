//! Balance records and the balance storage trait.

use serde::{Deserialize, Serialize};
use std::fmt;

use peerpool_types::{Account, Amount, Timestamp};

use crate::StoreError;

/// A pool account's running credit.
///
/// Credit may go negative; the balance manager's minimum-balance policy,
/// not the store, decides when that matters. `next_withdraw` rate-limits
/// settlement attempts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub account: Account,
    pub credit: Amount,
    pub next_withdraw: Timestamp,
}

impl Balance {
    /// The zero-valued balance an account has before any credit moves.
    pub fn empty(account: Account) -> Self {
        Self {
            account,
            credit: Amount::ZERO,
            next_withdraw: Timestamp::EPOCH,
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Balance({}, {})", self.account, self.credit)
    }
}

/// Storage of account balances.
///
/// Implemented by both storage backends and by the contract-backed
/// settlement adapter, which wraps a backend to add settlement awareness.
pub trait BalanceStore: Send + Sync {
    /// Current balance for an account; zero-valued if the account has
    /// never been seen. Never fails with NotFound.
    fn get_balance(&self, account: &Account) -> Result<Balance, StoreError>;

    /// Atomically add `delta` (possibly negative) to an account's credit,
    /// returning the balance after the mutation.
    fn add_balance(&self, account: &Account, delta: Amount) -> Result<Balance, StoreError>;

    /// Move an account's withdraw gate.
    fn set_next_withdraw(&self, account: &Account, at: Timestamp) -> Result<(), StoreError>;

    /// Sum of credit over all accounts (status reporting).
    fn total_balance(&self) -> Result<Amount, StoreError>;
}
