//! Read-only pool status with time-based caching.
//!
//! Dashboards poll aggressively; the cache shields the store and the
//! settlement authority from refresh storms. Staleness up to the cache
//! duration is fine, these numbers move slowly.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use peerpool_store::Store;
use peerpool_types::{Clock, Timestamp};

use crate::requests::StatusResponse;
use crate::settlement::ContractSettlement;
use crate::PoolError;

pub const DEFAULT_CACHE_SECS: u64 = 60;

struct CachedStatus {
    at: Timestamp,
    snapshot: StatusResponse,
}

pub struct PoolStatus {
    store: Arc<dyn Store>,
    settlement: Option<Arc<ContractSettlement>>,
    pub version: String,
    started: Timestamp,
    pub cache_secs: u64,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedStatus>>,
}

impl PoolStatus {
    pub fn new(
        store: Arc<dyn Store>,
        settlement: Option<Arc<ContractSettlement>>,
        version: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started = clock.now();
        Self {
            store,
            settlement,
            version,
            started,
            cache_secs: DEFAULT_CACHE_SECS,
            clock,
            cache: RwLock::new(None),
        }
    }

    pub async fn status(&self) -> Result<StatusResponse, PoolError> {
        let now = self.clock.now();
        {
            let cache = self.cache.read().await;
            if let Some(cached) = &*cache {
                if now.since(cached.at) < self.cache_secs {
                    return Ok(cached.snapshot.clone());
                }
            }
        }

        // Compute outside any lock: the deposit query is an authority
        // RPC. Concurrent refreshes may race; last writer wins and every
        // racer returns a snapshot no staler than its own computation.
        let snapshot = self.compute(now).await?;
        let mut cache = self.cache.write().await;
        match &*cache {
            Some(existing) if existing.at > now => {}
            _ => {
                *cache = Some(CachedStatus {
                    at: now,
                    snapshot: snapshot.clone(),
                });
            }
        }
        Ok(snapshot)
    }

    async fn compute(&self, now: Timestamp) -> Result<StatusResponse, PoolError> {
        let mut hosts: BTreeMap<String, u64> = BTreeMap::new();
        for host in self.store.active_hosts("", usize::MAX, now)? {
            *hosts.entry(host.kind).or_insert(0) += 1;
        }

        let total_deposit = match &self.settlement {
            Some(settlement) => Some(settlement.pending_balance().await?),
            None => None,
        };

        Ok(StatusResponse {
            hosts,
            total_balance: self.store.total_balance()?,
            total_deposit,
            pool_version: self.version.clone(),
            uptime_secs: now.since(self.started),
        })
    }
}
