//! Upstream pool configuration
//!
//! A pool names a set of destination clients plus routing policy. The proxy
//! core only reads the shape described here; hashing, timeouts, and failover
//! live with the route-handle implementations.

use serde::{Deserialize, Serialize};

/// Pool flavor, as it affects server accounting and migration handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    /// A plain pool of destinations in the local region.
    Regular,
    /// A pool addressed through a regional routing prefix.
    Regional,
    /// A pool mid-migration between two backing pools.
    Migrated,
}

/// Configuration of one upstream pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Unique pool name.
    pub name: String,

    pub pool_type: PoolType,

    /// Names of the destination clients in this pool, in ring order.
    pub clients: Vec<String>,
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, pool_type: PoolType) -> Self {
        Self {
            name: name.into(),
            pool_type,
            clients: Vec::new(),
        }
    }

    pub fn with_clients<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.clients = clients.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this pool's clients count toward the worker's server total.
    pub fn counts_as_servers(&self) -> bool {
        matches!(self.pool_type, PoolType::Regular | PoolType::Regional)
    }
}
