//! Config snapshot and atomic swap
//!
//! A snapshot bundles the route-handle tree, the pool and client maps, and
//! the service-info handler, published as one immutable unit. Workers hold
//! the current snapshot behind a read-write lock: readers take a short read
//! lock only to copy the reference, and every in-flight request pins its
//! snapshot through its request context, so retiring an old snapshot
//! naturally waits for its last user.

use md5::{Digest, Md5};
use memrouter_config::PoolConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::intake::IntakeEntry;
use crate::routes::{ClientConfig, RouteHandle, ServiceInfo};
use crate::worker::ProxyWorker;

/// Immutable routing configuration, published atomically.
pub struct ConfigSnapshot {
    route: Arc<dyn RouteHandle>,
    pools: HashMap<String, Arc<PoolConfig>>,
    clients: HashMap<String, Arc<ClientConfig>>,
    service_info: Arc<dyn ServiceInfo>,
    digest: String,
}

impl ConfigSnapshot {
    pub fn new(
        route: Arc<dyn RouteHandle>,
        pools: HashMap<String, Arc<PoolConfig>>,
        clients: HashMap<String, Arc<ClientConfig>>,
        service_info: Arc<dyn ServiceInfo>,
        digest: String,
    ) -> Self {
        Self {
            route,
            pools,
            clients,
            service_info,
            digest,
        }
    }

    /// Root of the route-handle tree.
    pub fn route(&self) -> &Arc<dyn RouteHandle> {
        &self.route
    }

    pub fn pools(&self) -> &HashMap<String, Arc<PoolConfig>> {
        &self.pools
    }

    pub fn clients(&self) -> &HashMap<String, Arc<ClientConfig>> {
        &self.clients
    }

    pub fn service_info(&self) -> &Arc<dyn ServiceInfo> {
        &self.service_info
    }

    /// MD5 digest of the configuration text this snapshot was built from.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// MD5 hex digest of a configuration text.
pub fn config_digest(text: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Holder for the worker's current snapshot.
///
/// The lock is held only for the pointer copy or swap, never across
/// routing.
#[derive(Default)]
pub struct ConfigHolder {
    inner: RwLock<Option<Arc<ConfigSnapshot>>>,
}

impl ConfigHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot; `None` only before the first successful
    /// configuration.
    pub fn get(&self) -> Option<Arc<ConfigSnapshot>> {
        self.inner.read().clone()
    }

    /// Install a new snapshot, returning the previous one.
    pub fn swap(&self, new: Arc<ConfigSnapshot>) -> Option<Arc<ConfigSnapshot>> {
        let mut inner = self.inner.write();
        inner.replace(new)
    }
}

/// Install a snapshot on one worker.
///
/// Recounts the server gauge from the regular/regional pools, swaps the
/// snapshot in, stamps the success time, and in async mode hands the old
/// snapshot to the worker's loop for retirement so the final reference is
/// never dropped under a lock.
pub fn config_swap(worker: &ProxyWorker, snapshot: Arc<ConfigSnapshot>) {
    let mut servers = 0u64;
    for pool in snapshot.pools().values() {
        if pool.counts_as_servers() {
            servers += pool.clients.len() as u64;
        }
    }
    worker
        .stats
        .num_servers
        .store(servers, std::sync::atomic::Ordering::Relaxed);

    let old = worker.config().swap(snapshot);
    worker
        .stats
        .config_last_success
        .store(unix_now_secs(), std::sync::atomic::Ordering::Relaxed);

    if let Some(old) = old {
        if !worker.options().sync_mode {
            // If the loop is already gone the entry is dropped right here,
            // which retires the snapshot on this thread instead.
            let _ = worker.post_intake(IntakeEntry::OldConfig(old));
        }
    }
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
