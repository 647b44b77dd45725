//! Settlement adapter: bridges pool balances to an external authority.
//!
//! The pool's ledger is authoritative for day-to-day billing (the fast
//! path); the settlement authority, typically a payment contract on a
//! blockchain network, holds the actual deposits and honors
//! withdrawals. Reconciliation is asynchronous: the pool never checks a
//! deposit on-chain before extending credit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ed25519_dalek::{Signer, SigningKey};

use peerpool_store::{Balance, BalanceStore, StoreError};
use peerpool_types::{Account, Amount, NetworkId, Signature, Timestamp};

use crate::keystore;
use crate::PoolError;

/// A settlement request as signed and submitted to the authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettleRequest {
    pub contract: String,
    pub account: Account,
    pub amount: Amount,
    /// Authority-side transaction nonce for the operator.
    pub nonce: u64,
}

/// Client view of the settlement authority's RPC surface.
#[async_trait]
pub trait SettlementAuthority: Send + Sync {
    /// Chain id of the network the authority endpoint serves.
    async fn chain_id(&self) -> Result<u64, PoolError>;

    /// Operator address the contract declares.
    async fn contract_operator(&self, contract: &str) -> Result<String, PoolError>;

    /// Total deposits currently backing the pool's contract.
    async fn pending_deposits(&self, contract: &str) -> Result<Amount, PoolError>;

    /// Next transaction nonce for the operator address.
    async fn transaction_count(&self, operator: &str) -> Result<u64, PoolError>;

    /// Submit a signed settlement, returning the transaction reference.
    async fn submit(&self, request: &SettleRequest, sig: &Signature) -> Result<String, PoolError>;
}

/// The settlement operator's signing credential.
pub struct OperatorCredential {
    key: SigningKey,
    address: String,
}

impl OperatorCredential {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(secret);
        let address = hex::encode(key.verifying_key().to_bytes());
        Self { key, address }
    }

    /// Load the credential from a sealed keystore file.
    pub fn from_keystore(path: &Path, passphrase: &str) -> Result<Self, PoolError> {
        let sealed = keystore::OperatorKeystore::read(path)?;
        Ok(Self::from_secret_bytes(&sealed.unseal(passphrase)?))
    }

    /// The operator address: lowercase hex of the public key.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.key.sign(message).to_bytes())
    }
}

/// JSON-RPC client for a settlement authority endpoint.
pub struct HttpAuthority {
    url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcReplyError>,
}

#[derive(Deserialize)]
struct RpcReplyError {
    message: String,
}

impl HttpAuthority {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            url: url.into(),
            client,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, PoolError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PoolError::TransientRpc(format!("{method}: {e}")))?;
        let reply: RpcReply = resp
            .json()
            .await
            .map_err(|e| PoolError::TransientRpc(format!("{method}: {e}")))?;
        if let Some(err) = reply.error {
            return Err(PoolError::TransientRpc(format!("{method}: {}", err.message)));
        }
        serde_json::from_value(reply.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| PoolError::TransientRpc(format!("{method}: bad result: {e}")))
    }
}

#[async_trait]
impl SettlementAuthority for HttpAuthority {
    async fn chain_id(&self) -> Result<u64, PoolError> {
        self.call("settlement_chainId", serde_json::json!([])).await
    }

    async fn contract_operator(&self, contract: &str) -> Result<String, PoolError> {
        self.call("settlement_operator", serde_json::json!([contract]))
            .await
    }

    async fn pending_deposits(&self, contract: &str) -> Result<Amount, PoolError> {
        self.call("settlement_pendingDeposits", serde_json::json!([contract]))
            .await
    }

    async fn transaction_count(&self, operator: &str) -> Result<u64, PoolError> {
        self.call("settlement_transactionCount", serde_json::json!([operator]))
            .await
    }

    async fn submit(&self, request: &SettleRequest, sig: &Signature) -> Result<String, PoolError> {
        self.call(
            "settlement_submit",
            serde_json::json!([request, sig.to_hex()]),
        )
        .await
    }
}

/// Contract-backed settlement: the balance store the rest of the pool
/// sees, plus settle/deposit operations against the authority.
///
/// Balance reads and writes stay on the local ledger; only settlement
/// and deposit queries touch the authority.
pub struct ContractSettlement {
    balances: Arc<dyn BalanceStore>,
    authority: Arc<dyn SettlementAuthority>,
    contract: String,
    operator: Option<OperatorCredential>,
    /// Serializes the send path so authority-side operator nonces never
    /// collide.
    send_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ContractSettlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractSettlement")
            .field("contract", &self.contract)
            .finish()
    }
}

impl ContractSettlement {
    /// Construct the adapter, verifying the deployment is coherent:
    /// the authority must be on the configured network, and when an
    /// operator credential is supplied it must match the contract's
    /// declared operator.
    pub async fn connect(
        balances: Arc<dyn BalanceStore>,
        authority: Arc<dyn SettlementAuthority>,
        contract: String,
        network: NetworkId,
        operator: Option<OperatorCredential>,
    ) -> Result<Self, PoolError> {
        let reported = authority.chain_id().await?;
        if NetworkId::from_chain_id(reported) != Some(network) {
            return Err(PoolError::NetworkMismatch {
                configured: network,
                reported,
            });
        }

        if let Some(credential) = &operator {
            let declared = authority.contract_operator(&contract).await?;
            if !declared.eq_ignore_ascii_case(credential.address()) {
                return Err(PoolError::AddressMismatch {
                    credential: credential.address().to_string(),
                    declared,
                });
            }
            info!(operator = %credential.address(), %contract, "settlement operator verified");
        } else {
            warn!(
                %contract,
                "settlement starting read-only: no operator keystore, withdrawals will fail"
            );
        }

        Ok(Self {
            balances,
            authority,
            contract,
            operator,
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn has_operator(&self) -> bool {
        self.operator.is_some()
    }

    /// Submit a settlement moving `amount` out of the pool to `account`'s
    /// wallet. A transient authority failure is retried once.
    pub async fn settle(&self, account: &Account, amount: Amount) -> Result<String, PoolError> {
        let Some(credential) = &self.operator else {
            return Err(PoolError::NotSupported(
                "settlement requires an operator credential".into(),
            ));
        };
        let _guard = self.send_lock.lock().await;

        let nonce = match self.authority.transaction_count(credential.address()).await {
            Err(PoolError::TransientRpc(e)) => {
                warn!(error = %e, "transaction count failed, retrying");
                self.authority.transaction_count(credential.address()).await?
            }
            other => other?,
        };

        let request = SettleRequest {
            contract: self.contract.clone(),
            account: account.clone(),
            amount,
            nonce,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| PoolError::InvalidRequest(format!("unencodable settlement: {e}")))?;
        let sig = credential.sign(&payload);

        let tx = match self.authority.submit(&request, &sig).await {
            Err(PoolError::TransientRpc(e)) => {
                warn!(error = %e, "settlement submit failed, retrying");
                self.authority.submit(&request, &sig).await?
            }
            other => other?,
        };
        info!(%account, %amount, %tx, "settlement submitted");
        Ok(tx)
    }

    /// Total deposits backing the pool, per the authority. A transient
    /// failure is retried once before surfacing.
    pub async fn pending_balance(&self) -> Result<Amount, PoolError> {
        match self.authority.pending_deposits(&self.contract).await {
            Err(PoolError::TransientRpc(e)) => {
                warn!(error = %e, "pending deposits query failed, retrying");
                self.authority.pending_deposits(&self.contract).await
            }
            other => other,
        }
    }
}

// The settlement-aware balance view: same ledger, contract awareness on
// the side.
impl BalanceStore for ContractSettlement {
    fn get_balance(&self, account: &Account) -> Result<Balance, StoreError> {
        self.balances.get_balance(account)
    }

    fn add_balance(&self, account: &Account, delta: Amount) -> Result<Balance, StoreError> {
        self.balances.add_balance(account, delta)
    }

    fn set_next_withdraw(&self, account: &Account, at: Timestamp) -> Result<(), StoreError> {
        self.balances.set_next_withdraw(account, at)
    }

    fn total_balance(&self) -> Result<Amount, StoreError> {
        self.balances.total_balance()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use peerpool_store_memory::MemoryStore;
    use std::sync::Mutex;

    /// Scriptable authority for adapter tests: each call site can be
    /// primed with a number of transient failures before succeeding.
    pub(crate) struct MockAuthority {
        pub chain_id: u64,
        pub operator: String,
        pub deposits: Amount,
        pub pending_failures: Mutex<u32>,
        pub submit_failures: Mutex<u32>,
        pub submitted: Mutex<Vec<SettleRequest>>,
    }

    impl MockAuthority {
        pub fn new(chain_id: u64, operator: &str) -> Self {
            Self {
                chain_id,
                operator: operator.to_string(),
                deposits: Amount::from_raw(1_000),
                pending_failures: Mutex::new(0),
                submit_failures: Mutex::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn take_failure(counter: &Mutex<u32>) -> bool {
            let mut remaining = counter.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl SettlementAuthority for MockAuthority {
        async fn chain_id(&self) -> Result<u64, PoolError> {
            Ok(self.chain_id)
        }

        async fn contract_operator(&self, _contract: &str) -> Result<String, PoolError> {
            Ok(self.operator.clone())
        }

        async fn pending_deposits(&self, _contract: &str) -> Result<Amount, PoolError> {
            if Self::take_failure(&self.pending_failures) {
                return Err(PoolError::TransientRpc("connection reset".into()));
            }
            Ok(self.deposits)
        }

        async fn transaction_count(&self, _operator: &str) -> Result<u64, PoolError> {
            Ok(self.submitted.lock().unwrap().len() as u64)
        }

        async fn submit(
            &self,
            request: &SettleRequest,
            _sig: &Signature,
        ) -> Result<String, PoolError> {
            if Self::take_failure(&self.submit_failures) {
                return Err(PoolError::TransientRpc("connection reset".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(request.clone());
            Ok(format!("0xtx{}", submitted.len()))
        }
    }

    pub(crate) fn operator() -> OperatorCredential {
        OperatorCredential::from_secret_bytes(&[7u8; 32])
    }

    fn balances() -> Arc<dyn BalanceStore> {
        Arc::new(MemoryStore::new())
    }

    pub(crate) async fn connected(authority: Arc<MockAuthority>) -> ContractSettlement {
        ContractSettlement::connect(
            balances(),
            authority,
            "0xC0FFEE".to_string(),
            NetworkId::Dev,
            Some(operator()),
        )
        .await
        .expect("connect")
    }

    #[tokio::test]
    async fn connect_verifies_network() {
        let authority = Arc::new(MockAuthority::new(1, &operator().address().to_string()));
        let err = ContractSettlement::connect(
            balances(),
            authority,
            "0xC0FFEE".to_string(),
            NetworkId::Dev,
            None,
        )
        .await
        .expect_err("mainnet authority for dev pool");
        assert!(matches!(err, PoolError::NetworkMismatch { reported: 1, .. }));
        assert!(err.remediation().is_some());
    }

    #[tokio::test]
    async fn connect_verifies_operator_address() {
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            "someone-else",
        ));
        let err = ContractSettlement::connect(
            balances(),
            authority,
            "0xC0FFEE".to_string(),
            NetworkId::Dev,
            Some(operator()),
        )
        .await
        .expect_err("wrong operator");
        assert!(matches!(err, PoolError::AddressMismatch { .. }));
    }

    #[tokio::test]
    async fn read_only_adapter_cannot_settle() {
        let authority = Arc::new(MockAuthority::new(NetworkId::Dev.chain_id(), "anyone"));
        let adapter = ContractSettlement::connect(
            balances(),
            authority,
            "0xC0FFEE".to_string(),
            NetworkId::Dev,
            None,
        )
        .await
        .expect("connect without credential");
        assert!(!adapter.has_operator());
        let err = adapter
            .settle(&Account::new("0xAAA"), Amount::from_raw(5))
            .await
            .expect_err("read-only");
        assert!(matches!(err, PoolError::NotSupported(_)));
    }

    #[tokio::test]
    async fn settle_submits_signed_request_with_authority_nonce() {
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            &operator().address().to_string(),
        ));
        let adapter = connected(authority.clone()).await;

        let tx = adapter
            .settle(&Account::new("0xAAA"), Amount::from_raw(500))
            .await
            .expect("settle");
        assert_eq!(tx, "0xtx1");

        let submitted = authority.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].account, Account::new("0xAAA"));
        assert_eq!(submitted[0].amount, Amount::from_raw(500));
        assert_eq!(submitted[0].nonce, 0);
    }

    #[tokio::test]
    async fn one_transient_submit_failure_is_retried() {
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            &operator().address().to_string(),
        ));
        *authority.submit_failures.lock().unwrap() = 1;
        let adapter = connected(authority.clone()).await;

        adapter
            .settle(&Account::new("0xAAA"), Amount::from_raw(5))
            .await
            .expect("retried");
        assert_eq!(authority.submitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_transient_submit_failures_surface() {
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            &operator().address().to_string(),
        ));
        *authority.submit_failures.lock().unwrap() = 2;
        let adapter = connected(authority.clone()).await;

        let err = adapter
            .settle(&Account::new("0xAAA"), Amount::from_raw(5))
            .await
            .expect_err("both attempts failed");
        assert!(matches!(err, PoolError::TransientRpc(_)));
        assert!(authority.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_balance_retries_once() {
        let authority = Arc::new(MockAuthority::new(
            NetworkId::Dev.chain_id(),
            &operator().address().to_string(),
        ));
        *authority.pending_failures.lock().unwrap() = 1;
        let adapter = connected(authority.clone()).await;
        assert_eq!(
            adapter.pending_balance().await.expect("retried"),
            Amount::from_raw(1_000)
        );

        *authority.pending_failures.lock().unwrap() = 2;
        assert!(adapter.pending_balance().await.is_err());
    }
}
