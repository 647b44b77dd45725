//! LMDB environment setup.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::LmdbError;

const MAX_DBS: u32 = 8;
const DEFAULT_MAP_SIZE: usize = 256 * 1024 * 1024;

/// Wraps the LMDB environment and all database handles.
pub struct LmdbEnvironment {
    env: Arc<Env>,

    /// Node records (JSON), keyed by node id. The record carries the
    /// node's payout-account binding; peers live in `peers_db`.
    pub(crate) nodes_db: Database<Bytes, Bytes>,

    /// Balance records (JSON), keyed by account.
    pub(crate) balances_db: Database<Bytes, Bytes>,

    /// Peer attestations: `<owner>/<peer>` → big-endian u64 timestamp.
    pub(crate) peers_db: Database<Bytes, Bytes>,

    /// Highest request nonce per node id: id → big-endian u64.
    pub(crate) nonces_db: Database<Bytes, Bytes>,

    /// Internal bookkeeping (schema version).
    pub(crate) meta_db: Database<Bytes, Bytes>,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at the given path.
    pub fn open(path: &Path) -> Result<Self, LmdbError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)
            .map_err(|e| LmdbError::Heed(format!("failed to create directory: {e}")))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(MAX_DBS)
                .map_size(map_size)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let nodes_db = env.create_database(&mut wtxn, Some("nodes"))?;
        let balances_db = env.create_database(&mut wtxn, Some("balances"))?;
        let peers_db = env.create_database(&mut wtxn, Some("peers"))?;
        let nonces_db = env.create_database(&mut wtxn, Some("nonces"))?;
        let meta_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;
        if meta_db.get(&wtxn, b"schema_version")?.is_none() {
            meta_db.put(&mut wtxn, b"schema_version", &1u32.to_be_bytes())?;
        }
        wtxn.commit()?;

        Ok(Self {
            env: Arc::new(env),
            nodes_db,
            balances_db,
            peers_db,
            nonces_db,
            meta_db,
        })
    }

    /// Get a shared reference to the underlying heed environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Force an `fsync` of the memory-mapped file during graceful
    /// shutdown. LMDB is durable on every commit; this flushes whatever
    /// the OS still holds dirty.
    pub fn force_sync(&self) -> Result<(), LmdbError> {
        let wtxn = self.env.write_txn()?;
        wtxn.commit()?;
        Ok(())
    }
}
