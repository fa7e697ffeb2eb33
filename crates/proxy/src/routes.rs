//! Route-handle contracts
//!
//! The worker core drives requests through a composable route-handle tree
//! but knows nothing about hashing rings, failover chains, or destination
//! I/O. This module defines the seams: the `RouteHandle` trait the tree
//! implements, the `ServiceInfo` handler for introspection requests, the
//! per-request context that pins a config snapshot, and the destination map
//! the reconfiguration driver sweeps.

use async_trait::async_trait;
use memrouter_common::msg::{McReply, McRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::request::RequestRef;
use crate::snapshot::ConfigSnapshot;

// ============================================================================
// Destination clients
// ============================================================================

/// Descriptor of one upstream destination client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Unique client name.
    pub name: String,
    /// Destination address, `host:port`.
    pub destination: String,
    /// Owning pool, when the client belongs to one.
    pub pool: Option<String>,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            pool: None,
        }
    }

    pub fn in_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }
}

// ============================================================================
// Request context
// ============================================================================

/// Per-request routing context.
///
/// Owns a reference to the config snapshot the request was dispatched
/// against, so the snapshot cannot be retired while the request is in
/// flight, plus a handle to the request itself. Cheap to clone; route
/// handles may keep clones across suspension points. Stays on the loop
/// thread with the request it wraps.
#[derive(Clone)]
pub struct RequestContext {
    snapshot: Arc<ConfigSnapshot>,
    request: Option<RequestRef>,
    sender_id: u64,
}

impl RequestContext {
    /// A context without a live request, for introspection probes.
    pub fn probe(snapshot: Arc<ConfigSnapshot>, sender_id: u64) -> Self {
        Self {
            snapshot,
            request: None,
            sender_id,
        }
    }

    /// The context a request routes under.
    pub(crate) fn for_request(snapshot: Arc<ConfigSnapshot>, request: RequestRef) -> Self {
        let sender_id = request.sender_id();
        Self {
            snapshot,
            request: Some(request),
            sender_id,
        }
    }

    /// The snapshot this request routes against.
    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// The request being routed; absent on probe contexts.
    pub fn request(&self) -> Option<&RequestRef> {
        self.request.as_ref()
    }

    pub fn sender_id(&self) -> u64 {
        self.sender_id
    }
}

// ============================================================================
// Route handles
// ============================================================================

/// One node of the route-handle tree.
///
/// `dispatch` may suspend while awaiting upstream replies; it must resolve
/// every request to a reply or an error. Errors never reach the client
/// directly; the worker converts them into `local_error` replies.
#[async_trait(?Send)]
pub trait RouteHandle: Send + Sync {
    /// Route a request, returning the synthesized reply.
    async fn dispatch(&self, req: McRequest, ctx: RequestContext) -> anyhow::Result<McReply>;

    /// Children that could see this request, for introspection walks.
    fn could_route_to(&self, _req: &McRequest) -> Vec<Arc<dyn RouteHandle>> {
        Vec::new()
    }

    /// The destination client, when this node is a leaf.
    fn client(&self) -> Option<&ClientConfig> {
        None
    }
}

/// Handler for `get_service_info` requests.
///
/// Invoked on the worker loop with the current snapshot pinned; the
/// implementation owns replying (and may do so asynchronously).
pub trait ServiceInfo: Send + Sync {
    fn handle_request(&self, preq: &RequestRef, ctx: RequestContext);
}

/// Host-installable destination health callbacks.
pub trait ClientMonitor: Send + Sync {
    /// An upstream answered on this client.
    fn on_response(&self, client: &ClientConfig, reply: &McReply);
    /// The client was marked down.
    fn on_down(&self, client: &ClientConfig);
    /// Whether a request may currently be sent to this client.
    fn may_send(&self, client: &ClientConfig) -> bool;
    /// The client is being removed from the map.
    fn remove_client(&self, client: &ClientConfig);
}

// ============================================================================
// Destination map
// ============================================================================

struct Destination {
    client: Arc<ClientConfig>,
    used: bool,
}

/// The worker's upstream connection registry.
///
/// Connection state itself is the host's concern; the core only tracks
/// which clients the current configuration references, so reconfiguration
/// can reuse live destinations and reclaim abandoned ones.
#[derive(Default)]
pub struct DestinationMap {
    inner: Mutex<HashMap<String, Destination>>,
}

impl DestinationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, or mark an existing entry as used.
    pub fn ensure(&self, client: Arc<ClientConfig>) {
        let mut inner = self.inner.lock();
        inner
            .entry(client.name.clone())
            .and_modify(|d| d.used = true)
            .or_insert(Destination { client, used: true });
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientConfig>> {
        self.inner.lock().get(name).map(|d| d.client.clone())
    }

    /// Mark every entry unused; a following config build re-marks the ones
    /// it still references.
    pub fn mark_all_as_unused(&self) {
        for dest in self.inner.lock().values_mut() {
            dest.used = false;
        }
    }

    /// Drop entries no configuration references anymore. Returns how many
    /// were removed.
    pub fn retire_unused(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, d| d.used);
        before - inner.len()
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_map_reuse_cycle() {
        let map = DestinationMap::new();
        map.ensure(Arc::new(ClientConfig::new("a", "10.0.0.1:11211")));
        map.ensure(Arc::new(ClientConfig::new("b", "10.0.0.2:11211")));
        assert_eq!(map.len(), 2);

        // a new config build keeps "a" only
        map.mark_all_as_unused();
        map.ensure(Arc::new(ClientConfig::new("a", "10.0.0.1:11211")));
        assert_eq!(map.retire_unused(), 1);
        assert_eq!(map.len(), 1);
        assert!(map.get("a").is_some());
        assert!(map.get("b").is_none());
    }

    #[test]
    fn test_destination_map_reset() {
        let map = DestinationMap::new();
        map.ensure(Arc::new(ClientConfig::new("a", "10.0.0.1:11211")));
        map.reset();
        assert!(map.is_empty());
    }
}
