//! Pool configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use peerpool_types::{Amount, NetworkId};

use crate::PoolError;

/// Which storage backend the pool runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Everything in memory; state is lost on restart.
    Memory,
    /// Durable LMDB database under `data_dir`.
    Lmdb,
}

/// Configuration for a peerpool instance.
///
/// Can be loaded from a TOML file via [`PoolConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Storage backend.
    #[serde(default = "default_store")]
    pub store: StoreBackend,

    /// Data directory for the LMDB backend.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Address the RPC server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Value for the Access-Control-Allow-Origin header, when set.
    #[serde(default)]
    pub allow_origin: Option<String>,

    /// Pool-wide ceiling on hosts returned per client request.
    #[serde(default = "default_max_request_hosts")]
    pub max_request_hosts: usize,

    /// Credit moved per corroborated peering per keepalive interval,
    /// in whole units (e.g. "0.000002").
    #[serde(default = "default_credit_per_interval")]
    pub credit_per_interval: String,

    /// Minimum client balance, in whole units, or "off" to disable.
    #[serde(default = "default_min_balance")]
    pub min_balance: String,

    /// Smallest withdrawable gross amount, in whole units.
    #[serde(default = "default_withdraw_min")]
    pub withdraw_min: String,

    /// Flat withdrawal fee, in whole units.
    #[serde(default = "default_withdraw_fee")]
    pub withdraw_fee: String,

    /// Seconds between settlement attempts per account.
    #[serde(default = "default_withdraw_cooldown")]
    pub withdraw_cooldown_secs: u64,

    /// Seconds a status snapshot stays cached.
    #[serde(default = "default_status_cache")]
    pub status_cache_secs: u64,

    /// Welcome message override; `{{NodeID}}` is bound to the caller.
    #[serde(default)]
    pub welcome: Option<String>,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Settlement contract; absent means the pool runs ledger-only.
    #[serde(default)]
    pub contract: Option<ContractConfig>,
}

/// Settlement authority wiring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Network the contract is deployed on: "mainnet", "testnet", "dev".
    pub network: String,

    /// Contract address on that network.
    pub address: String,

    /// Authority JSON-RPC endpoint; must be on the same network as the
    /// contract.
    pub rpc_url: String,

    /// Path to the operator's encrypted keystore. Without it the pool
    /// runs settlement read-only and withdrawals fail.
    #[serde(default)]
    pub keystore: Option<PathBuf>,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_store() -> StoreBackend {
    StoreBackend::Memory
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./peerpool_data")
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_request_hosts() -> usize {
    10
}

fn default_credit_per_interval() -> String {
    "0.000002".to_string()
}

fn default_min_balance() -> String {
    "off".to_string()
}

fn default_withdraw_min() -> String {
    "0.005".to_string()
}

fn default_withdraw_fee() -> String {
    "0.0025".to_string()
}

fn default_withdraw_cooldown() -> u64 {
    3_600
}

fn default_status_cache() -> u64 {
    60
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl PoolConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, PoolError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PoolError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, PoolError> {
        toml::from_str(s).map_err(|e| PoolError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("PoolConfig is always serializable to TOML")
    }

    pub fn credit_per_interval(&self) -> Result<Amount, PoolError> {
        Amount::parse_units(&self.credit_per_interval)
            .map_err(|e| PoolError::Config(format!("credit_per_interval: {e}")))
    }

    /// The configured minimum balance, or `None` when disabled with "off".
    pub fn min_balance(&self) -> Result<Option<Amount>, PoolError> {
        if self.min_balance == "off" {
            return Ok(None);
        }
        Amount::parse_units(&self.min_balance)
            .map(Some)
            .map_err(|e| PoolError::Config(format!("min_balance: {e}")))
    }

    pub fn withdraw_min(&self) -> Result<Amount, PoolError> {
        Amount::parse_units(&self.withdraw_min)
            .map_err(|e| PoolError::Config(format!("withdraw_min: {e}")))
    }

    pub fn withdraw_fee(&self) -> Result<Amount, PoolError> {
        Amount::parse_units(&self.withdraw_fee)
            .map_err(|e| PoolError::Config(format!("withdraw_fee: {e}")))
    }
}

impl ContractConfig {
    pub fn network(&self) -> Result<NetworkId, PoolError> {
        self.network
            .parse()
            .map_err(|e| PoolError::Config(format!("contract.network: {e}")))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            data_dir: default_data_dir(),
            bind: default_bind(),
            allow_origin: None,
            max_request_hosts: default_max_request_hosts(),
            credit_per_interval: default_credit_per_interval(),
            min_balance: default_min_balance(),
            withdraw_min: default_withdraw_min(),
            withdraw_fee: default_withdraw_fee(),
            withdraw_cooldown_secs: default_withdraw_cooldown(),
            status_cache_secs: default_status_cache(),
            welcome: None,
            log_format: default_log_format(),
            log_level: default_log_level(),
            contract: None,
        }
    }
}
