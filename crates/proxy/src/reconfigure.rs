//! Reconfiguration driver
//!
//! The router owns the workers and drives configuration changes across
//! them: build a snapshot per worker from one configuration text, then
//! swap them all in, or swap none if any build fails. Building is
//! serialized under the router's reconfiguration lock; request processing
//! never waits on it.

use anyhow::Context;
use memrouter_common::RouterResult;
use memrouter_config::runtime_vars::RuntimeVarsPublisher;
use memrouter_config::RoutingPrefix;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, info};

use crate::options::ProxyOptions;
use crate::snapshot::{config_swap, unix_now_secs, ConfigSnapshot};
use crate::worker::ProxyWorker;

/// Source of configuration text.
pub trait ConfigApi: Send + Sync {
    fn get_config_text(&self) -> anyhow::Result<String>;
}

/// Builds per-worker snapshots out of one configuration text.
///
/// A builder is created once per reconfiguration, seeded with worker 0's
/// routing prefix; prefixes are assumed uniform across workers.
pub trait SnapshotBuilder {
    fn build_for(&self, worker: &ProxyWorker) -> anyhow::Result<Arc<ConfigSnapshot>>;
}

/// Factory validating configuration text into a [`SnapshotBuilder`].
pub trait SnapshotBuilderFactory: Send + Sync {
    fn make_builder(
        &self,
        seed: &RoutingPrefix,
        config_text: &str,
    ) -> anyhow::Result<Box<dyn SnapshotBuilder>>;
}

#[derive(Default)]
struct StartupLatch {
    attached: Mutex<usize>,
    cv: Condvar,
}

impl StartupLatch {
    fn notify(&self) {
        let mut attached = self.attached.lock();
        *attached += 1;
        self.cv.notify_all();
    }

    fn wait_for(&self, count: usize) {
        let mut attached = self.attached.lock();
        while *attached < count {
            self.cv.wait(&mut attached);
        }
    }
}

/// The router: shared configuration source for a set of workers.
pub struct Router {
    workers: Mutex<Vec<Arc<ProxyWorker>>>,
    config_api: Arc<dyn ConfigApi>,
    factory: Arc<dyn SnapshotBuilderFactory>,
    reconfig_lock: RwLock<()>,
    last_config_attempt: AtomicU64,
    config_failures: AtomicU64,
    runtime_vars: RuntimeVarsPublisher,
    startup: StartupLatch,
}

impl Router {
    pub fn new(
        config_api: Arc<dyn ConfigApi>,
        factory: Arc<dyn SnapshotBuilderFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(Vec::new()),
            config_api,
            factory,
            reconfig_lock: RwLock::new(()),
            last_config_attempt: AtomicU64::new(0),
            config_failures: AtomicU64::new(0),
            runtime_vars: RuntimeVarsPublisher::new(),
            startup: StartupLatch::default(),
        })
    }

    /// Create a worker owned by this router.
    pub fn spawn_worker(
        self: &Arc<Self>,
        options: ProxyOptions,
        perform_stats_logging: bool,
    ) -> RouterResult<Arc<ProxyWorker>> {
        let worker = ProxyWorker::new(Arc::downgrade(self), options, perform_stats_logging)?;
        self.workers.lock().push(worker.clone());
        Ok(worker)
    }

    /// Register an externally constructed worker.
    pub fn add_worker(&self, worker: Arc<ProxyWorker>) {
        self.workers.lock().push(worker);
    }

    pub fn workers(&self) -> Vec<Arc<ProxyWorker>> {
        self.workers.lock().clone()
    }

    pub fn runtime_vars(&self) -> &RuntimeVarsPublisher {
        &self.runtime_vars
    }

    /// Weak handle for worker construction.
    pub fn weak(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    pub(crate) fn startup_notify(&self) {
        self.startup.notify();
    }

    /// Block until `count` workers have attached to their event loops.
    pub fn wait_for_startup(&self, count: usize) {
        self.startup.wait_for(count);
    }

    pub fn config_failures(&self) -> u64 {
        self.config_failures.load(Ordering::Relaxed)
    }

    pub fn last_config_attempt(&self) -> u64 {
        self.last_config_attempt.load(Ordering::Relaxed)
    }

    /// Reconfigure every worker from the given configuration text.
    ///
    /// All-or-nothing: a snapshot is built for each worker first, and only
    /// when all builds succeed are they swapped in, in worker order.
    pub fn configure_from_text(&self, config_text: &str) -> bool {
        let workers = self.workers();
        if workers.is_empty() {
            error!("cannot configure a router with no workers");
            return false;
        }

        let built = self.build_all(&workers, config_text);
        let snapshots = match built {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!(error = %format!("{:#}", e), "error creating route configuration");
                return false;
            }
        };

        for (worker, snapshot) in workers.iter().zip(snapshots.iter()) {
            config_swap(worker, snapshot.clone());
        }

        if !workers[0].options().constantly_reload_configs {
            info!(
                workers = workers.len(),
                clients = snapshots[0].clients().len(),
                pools = snapshots[0].pools().len(),
                digest = %snapshots[0].digest(),
                "reconfigured"
            );
        }
        true
    }

    fn build_all(
        &self,
        workers: &[Arc<ProxyWorker>],
        config_text: &str,
    ) -> anyhow::Result<Vec<Arc<ConfigSnapshot>>> {
        // Prefixes are assumed uniform; worker 0 seeds the builder.
        let builder = self
            .factory
            .make_builder(workers[0].routing_prefix(), config_text)
            .context("validating configuration")?;

        let mut snapshots = Vec::with_capacity(workers.len());
        for worker in workers {
            anyhow::ensure!(
                !worker.routing_prefix().as_str().is_empty(),
                "empty default route"
            );

            // Destinations still referenced by the new config are re-marked
            // during the build; the rest get reclaimed by the sweep.
            worker.destinations().mark_all_as_unused();

            let snapshot = builder
                .build_for(worker)
                .with_context(|| format!("building snapshot for worker {}", worker.magic()))?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Fetch configuration text from the config API and apply it.
    ///
    /// The attempt is stamped before reading so a recorded success is never
    /// older than the last attempt. Failures leave workers on their prior
    /// snapshots and bump the failure counter.
    pub fn configure(&self) -> bool {
        let _guard = self.reconfig_lock.write();
        self.last_config_attempt
            .store(unix_now_secs(), Ordering::Relaxed);

        let success = match self.config_api.get_config_text() {
            Ok(text) => self.configure_from_text(&text),
            Err(e) => {
                info!(error = %format!("{:#}", e), "cannot read config");
                false
            }
        };

        if !success {
            self.config_failures.fetch_add(1, Ordering::Relaxed);
        }
        success
    }
}
