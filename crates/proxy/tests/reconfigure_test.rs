//! Reconfiguration: all-or-nothing swaps across workers, snapshot pinning
//! for in-flight requests, and the file-driven configure path.

mod common;

use anyhow::Context;
use common::*;
use memrouter_proxy::{
    config_digest, ConfigApi, ConfigSnapshot, McReply, Op, ProxyOptions, ProxyWorker, ReplyResult,
    RouteHandle, Router, SnapshotBuilder, SnapshotBuilderFactory,
};
use memrouter_config::RoutingPrefix;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::LocalSet;

fn options() -> ProxyOptions {
    ProxyOptions {
        default_route: "/prn/cluster01/".to_string(),
        ..Default::default()
    }
}

/// Placeholder for tests that drive `configure_from_text` directly.
struct UnusedConfigApi;

impl ConfigApi for UnusedConfigApi {
    fn get_config_text(&self) -> anyhow::Result<String> {
        anyhow::bail!("config source unavailable")
    }
}

struct FileConfigApi {
    path: PathBuf,
}

impl ConfigApi for FileConfigApi {
    fn get_config_text(&self) -> anyhow::Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))
    }
}

/// Builds snapshots whose route tags replies with the config text, or a
/// shared gated route when one is installed. Can be told to fail the build
/// for one worker.
#[derive(Default)]
struct TestFactory {
    gated: Mutex<Option<Arc<ManualRoute>>>,
    fail_for_magic: Mutex<Option<u64>>,
}

impl TestFactory {
    fn set_gated(&self, route: Option<Arc<ManualRoute>>) {
        *self.gated.lock() = route;
    }

    fn set_fail_for(&self, magic: Option<u64>) {
        *self.fail_for_magic.lock() = magic;
    }
}

impl SnapshotBuilderFactory for TestFactory {
    fn make_builder(
        &self,
        _seed: &RoutingPrefix,
        config_text: &str,
    ) -> anyhow::Result<Box<dyn SnapshotBuilder>> {
        Ok(Box::new(TestBuilder {
            text: config_text.to_string(),
            gated: self.gated.lock().clone(),
            fail_for_magic: *self.fail_for_magic.lock(),
        }))
    }
}

struct TestBuilder {
    text: String,
    gated: Option<Arc<ManualRoute>>,
    fail_for_magic: Option<u64>,
}

impl SnapshotBuilder for TestBuilder {
    fn build_for(&self, worker: &ProxyWorker) -> anyhow::Result<Arc<ConfigSnapshot>> {
        if self.fail_for_magic == Some(worker.magic()) {
            anyhow::bail!("pool references unknown client");
        }
        let route: Arc<dyn RouteHandle> = match &self.gated {
            Some(gate) => gate.clone(),
            None => TaggedRoute::new(self.text.clone()),
        };
        Ok(Arc::new(ConfigSnapshot::new(
            route,
            HashMap::new(),
            HashMap::new(),
            RecordingServiceInfo::new(),
            config_digest(&self.text),
        )))
    }
}

#[tokio::test]
async fn test_atomic_reconfiguration_across_workers() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let factory = Arc::new(TestFactory::default());
            let router = Router::new(Arc::new(UnusedConfigApi), factory.clone());

            let w1 = router.spawn_worker(options(), false).unwrap();
            let w2 = router.spawn_worker(options(), false).unwrap();
            let _c1 = w1.attach_event_base().unwrap();
            let _c2 = w2.attach_event_base().unwrap();
            router.wait_for_startup(2);

            // First config: a shared gated route, so requests stay in
            // flight on demand.
            let gate = ManualRoute::new();
            factory.set_gated(Some(gate.clone()));
            assert!(router.configure_from_text("v1"));

            let old1 = w1.current_config().unwrap();
            assert_eq!(old1.digest(), config_digest("v1"));
            let old_weak = Arc::downgrade(&old1);
            drop(old1);

            // One request mid-flight on each worker.
            let rx1 = enqueue_on(&w1, get_req("k1"));
            let rx2 = enqueue_on(&w2, get_req("k2"));
            drain().await;
            assert_eq!(gate.started().len(), 2);

            // Swap both workers to the new snapshot.
            factory.set_gated(None);
            assert!(router.configure_from_text("v2"));
            drain().await;
            assert_eq!(w1.current_config().unwrap().digest(), config_digest("v2"));
            assert_eq!(w2.current_config().unwrap().digest(), config_digest("v2"));

            // The old snapshot stays pinned by the in-flight requests.
            assert!(old_weak.upgrade().is_some());

            // In-flight requests complete against their original snapshot.
            assert!(gate.complete(
                "k1",
                McReply::with_message(Op::Get, ReplyResult::Ok, "old:k1")
            ));
            assert!(gate.complete(
                "k2",
                McReply::with_message(Op::Get, ReplyResult::Ok, "old:k2")
            ));
            drain().await;
            assert_eq!(rx1.await.unwrap().value_str(), "old:k1");
            assert_eq!(rx2.await.unwrap().value_str(), "old:k2");

            // With its last pin gone, the old snapshot retires.
            drain().await;
            assert!(old_weak.upgrade().is_none());

            // New requests route through the new snapshot.
            let rx3 = enqueue_on(&w1, get_req("k3"));
            drain().await;
            assert_eq!(rx3.await.unwrap().value_str(), "v2:k3");

            // A failing per-worker build swaps neither worker.
            factory.set_fail_for(Some(w2.magic()));
            assert!(!router.configure_from_text("v3"));
            assert_eq!(w1.current_config().unwrap().digest(), config_digest("v2"));
            assert_eq!(w2.current_config().unwrap().digest(), config_digest("v2"));
        })
        .await;
}

#[tokio::test]
async fn test_file_driven_configure() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("router.cfg");
            std::fs::write(&path, "cfg-a").unwrap();

            let api = Arc::new(FileConfigApi { path: path.clone() });
            let factory = Arc::new(TestFactory::default());
            let router = Router::new(api, factory);

            let worker = router.spawn_worker(options(), false).unwrap();
            let _core = worker.attach_event_base().unwrap();

            assert!(router.configure());
            assert_eq!(router.config_failures(), 0);
            assert!(router.last_config_attempt() > 0);
            assert_eq!(
                worker.current_config().unwrap().digest(),
                config_digest("cfg-a")
            );
            let success_stamp = worker
                .stats
                .config_last_success
                .load(std::sync::atomic::Ordering::Relaxed);
            assert!(success_stamp >= router.last_config_attempt());

            // A missing file fails the attempt; the worker keeps serving on
            // its prior snapshot.
            std::fs::remove_file(&path).unwrap();
            assert!(!router.configure());
            assert_eq!(router.config_failures(), 1);
            assert_eq!(
                worker.current_config().unwrap().digest(),
                config_digest("cfg-a")
            );
            assert_eq!(
                worker
                    .stats
                    .config_last_success
                    .load(std::sync::atomic::Ordering::Relaxed),
                success_stamp
            );
        })
        .await;
}

#[tokio::test]
async fn test_default_route_validation_at_construction() {
    // Valid prefix: region and cluster are derived.
    let worker = ProxyWorker::standalone(ProxyOptions {
        default_route: "/prn/cluster01/".to_string(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(worker.default_region(), "prn");
    assert_eq!(worker.default_cluster(), "cluster01");
    assert_eq!(worker.routing_prefix().as_str(), "/prn/cluster01/");

    // No leading slash.
    assert!(ProxyWorker::standalone(ProxyOptions {
        default_route: "prn/cluster01".to_string(),
        ..Default::default()
    })
    .is_err());

    // Missing cluster.
    assert!(ProxyWorker::standalone(ProxyOptions {
        default_route: "/prn/".to_string(),
        ..Default::default()
    })
    .is_err());

    // Empty.
    assert!(ProxyWorker::standalone(ProxyOptions {
        default_route: String::new(),
        ..Default::default()
    })
    .is_err());
}

#[tokio::test]
async fn test_workers_get_unique_magic() {
    let a = ProxyWorker::standalone(options()).unwrap();
    let b = ProxyWorker::standalone(options()).unwrap();
    assert_ne!(a.magic(), b.magic());
}
