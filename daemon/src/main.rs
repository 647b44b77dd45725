//! peerpool daemon — entry point for running a node pool.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use peerpool_core::keystore::KEYSTORE_PASSPHRASE_ENV;
use peerpool_core::{
    ContractSettlement, HttpAuthority, Matchmaker, OperatorCredential, PaymentService, Pool,
    PoolConfig, PoolError, PoolStatus, StoreBackend, WelcomeTemplate,
};
use peerpool_core::balance::PayPerInterval;
use peerpool_core::logging::init_logging;
use peerpool_rpc::{router, RpcState};
use peerpool_store::{BalanceStore, Store, EXPIRY_FACTOR, KEEPALIVE_INTERVAL_SECS};
use peerpool_store_lmdb::LmdbStore;
use peerpool_store_memory::MemoryStore;
use peerpool_types::{Clock, SystemClock};

/// Nodes idle this long get swept from the store. Expiry itself is
/// keepalive-driven; the sweep only reclaims space.
const PURGE_AFTER_SECS: u64 = 24 * 3_600;
const PURGE_EVERY_SECS: u64 = 3_600;

#[derive(Parser)]
#[command(name = "peerpool", about = "Node pool coordinator daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. "0.0.0.0:8080".
    #[arg(long, env = "POOL_BIND")]
    bind: Option<String>,

    /// Storage backend: "memory" or "lmdb".
    #[arg(long, env = "POOL_STORE")]
    store: Option<String>,

    /// Data directory for the LMDB backend.
    #[arg(long, env = "POOL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Access-Control-Allow-Origin value for browser dashboards.
    #[arg(long, env = "POOL_ALLOW_ORIGIN")]
    allow_origin: Option<String>,

    /// Ceiling on hosts returned per client request.
    #[arg(long, env = "POOL_MAX_REQUEST_HOSTS")]
    max_request_hosts: Option<usize>,

    /// Credit per corroborated peering per keepalive interval, in whole
    /// units (e.g. "0.000002").
    #[arg(long, env = "POOL_PRICE")]
    price: Option<String>,

    /// Minimum client balance in whole units, or "off".
    #[arg(long, env = "POOL_MIN_BALANCE")]
    min_balance: Option<String>,

    /// Welcome message override; {{NodeID}} is bound to the caller.
    #[arg(long, env = "POOL_WELCOME")]
    welcome: Option<String>,

    /// Settlement network the payment contract lives on.
    #[arg(long, env = "POOL_CONTRACT_NETWORK")]
    contract_network: Option<String>,

    /// Payment contract address.
    #[arg(long, env = "POOL_CONTRACT_ADDRESS")]
    contract_address: Option<String>,

    /// Settlement authority JSON-RPC endpoint.
    #[arg(long, env = "POOL_CONTRACT_RPC")]
    contract_rpc: Option<String>,

    /// Path to the operator's encrypted keystore; passphrase comes from
    /// the POOL_KEYSTORE_PASSPHRASE environment variable.
    #[arg(long, env = "POOL_CONTRACT_KEYSTORE")]
    contract_keystore: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "POOL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "POOL_LOG_FORMAT")]
    log_format: Option<String>,
}

impl Cli {
    /// File config as the base, flags and env vars on top.
    fn into_config(self) -> anyhow::Result<PoolConfig> {
        let mut config = match &self.config {
            Some(path) => PoolConfig::from_toml_file(&path.display().to_string())
                .map_err(explain)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => PoolConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(store) = self.store {
            config.store = match store.as_str() {
                "memory" => StoreBackend::Memory,
                "lmdb" | "persist" => StoreBackend::Lmdb,
                other => anyhow::bail!("unknown storage backend: {other}"),
            };
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(origin) = self.allow_origin {
            config.allow_origin = Some(origin);
        }
        if let Some(max) = self.max_request_hosts {
            config.max_request_hosts = max;
        }
        if let Some(price) = self.price {
            config.credit_per_interval = price;
        }
        if let Some(min) = self.min_balance {
            config.min_balance = min;
        }
        if let Some(welcome) = self.welcome {
            config.welcome = Some(welcome);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        if let (Some(network), Some(address), Some(rpc_url)) = (
            self.contract_network,
            self.contract_address,
            self.contract_rpc,
        ) {
            config.contract = Some(peerpool_core::ContractConfig {
                network,
                address,
                rpc_url,
                keystore: self.contract_keystore,
            });
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config()?;

    init_logging(&config).map_err(explain)?;

    let (store, ledger): (Arc<dyn Store>, Arc<dyn BalanceStore>) = match config.store {
        StoreBackend::Memory => {
            let s = Arc::new(MemoryStore::new());
            (s.clone(), s)
        }
        StoreBackend::Lmdb => {
            let s = Arc::new(
                LmdbStore::open(&config.data_dir)
                    .with_context(|| format!("opening store at {}", config.data_dir.display()))?,
            );
            tracing::info!(dir = %config.data_dir.display(), "persistent store using LMDB backend");
            (s.clone(), s)
        }
    };

    let settlement = match &config.contract {
        Some(contract) => {
            let operator = match &contract.keystore {
                Some(path) => {
                    let passphrase = std::env::var(KEYSTORE_PASSPHRASE_ENV).unwrap_or_default();
                    Some(OperatorCredential::from_keystore(path, &passphrase).map_err(explain)?)
                }
                None => None,
            };
            let authority = Arc::new(HttpAuthority::new(contract.rpc_url.clone()));
            let adapter = ContractSettlement::connect(
                ledger.clone(),
                authority,
                contract.address.clone(),
                contract.network().map_err(explain)?,
                operator,
            )
            .await
            .map_err(explain)?;
            Some(Arc::new(adapter))
        }
        None => None,
    };

    // The balance view the billing and payment paths see: the
    // settlement adapter when configured, the bare ledger otherwise.
    let balances: Arc<dyn BalanceStore> = match &settlement {
        Some(adapter) => adapter.clone(),
        None => ledger,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut billing = PayPerInterval::new(
        store.clone(),
        balances.clone(),
        config.credit_per_interval().map_err(explain)?,
    );
    billing.min_balance = config.min_balance().map_err(explain)?;

    let mut pool = Pool::new(store.clone(), billing, clock.clone());
    pool.matchmaker = Matchmaker {
        max_request_hosts: config.max_request_hosts,
        ..Matchmaker::default()
    };
    if let Some(welcome) = &config.welcome {
        pool.welcome = WelcomeTemplate::new(welcome.clone());
    }
    let version = pool.version.clone();

    let mut payment = PaymentService::new(
        store.clone(),
        balances.clone(),
        settlement.clone(),
        clock.clone(),
    );
    payment.withdraw_min = config.withdraw_min().map_err(explain)?;
    payment.withdraw_fee = config.withdraw_fee().map_err(explain)?;
    payment.withdraw_cooldown_secs = config.withdraw_cooldown_secs;

    let mut status = PoolStatus::new(store.clone(), settlement.clone(), version.clone(), clock.clone());
    status.cache_secs = config.status_cache_secs;

    let state = Arc::new(RpcState {
        pool: Arc::new(pool),
        payment: Arc::new(payment),
        status: Arc::new(status),
        store: store.clone(),
    });

    // Background sweep of long-dead records. Strictly housekeeping:
    // expired nodes are already invisible to matchmaking.
    {
        let store = store.clone();
        let clock = clock.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(PURGE_EVERY_SECS));
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                match store.purge_inactive(PURGE_AFTER_SECS, clock.now()) {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "swept inactive nodes"),
                    Err(e) => tracing::warn!(error = %e, "inactive-node sweep failed"),
                }
            }
        });
    }

    let app = router(state, config.allow_origin.as_deref());
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(
        version = %version,
        bind = %config.bind,
        keepalive = KEEPALIVE_INTERVAL_SECS,
        expiry = EXPIRY_FACTOR * KEEPALIVE_INTERVAL_SECS,
        "pool listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("pool daemon exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

/// Attach the operator remediation to startup errors, so a
/// misconfigured pool fails with instructions rather than a bare kind.
fn explain(e: PoolError) -> anyhow::Error {
    match e.remediation() {
        Some(hint) => anyhow::anyhow!("{e}\n  {hint}"),
        None => anyhow::anyhow!("{e}"),
    }
}
