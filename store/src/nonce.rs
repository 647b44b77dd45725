//! Replay-protection nonce storage trait.

use peerpool_types::NodeId;

use crate::StoreError;

/// Tracks the highest request nonce seen per node id.
///
/// Nonces outlive node records: a disconnect followed by a re-register
/// must not reopen the replay window.
pub trait NonceStore: Send + Sync {
    /// Atomically assert `nonce` is strictly greater than the highest
    /// nonce recorded for `id`, and record it. Fails with
    /// [`StoreError::StaleNonce`] otherwise. Linearizable per id.
    fn check_and_save_nonce(&self, id: &NodeId, nonce: u64) -> Result<(), StoreError>;
}
