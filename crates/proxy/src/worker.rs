//! Worker lifecycle
//!
//! A worker owns one event loop's worth of proxy state: the current config
//! snapshot, the admission queue, the destination map, stats, and two async
//! writers. Construction is detached; `attach_event_base` binds the worker
//! to its loop exactly once and must run on the loop thread, inside a
//! `tokio::task::LocalSet`. All per-request state then lives and dies on
//! that thread.

use memrouter_config::RoutingPrefix;
use memrouter_common::{RouterError, RouterResult};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak as RcWeak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::intake::{IntakeEntry, IntakeQueue, IntakeReceiver, RequestIntake};
use crate::options::ProxyOptions;
use crate::reconfigure::Router;
use crate::request::RequestRef;
use crate::routes::{ClientConfig, ClientMonitor, DestinationMap};
use crate::snapshot::{ConfigHolder, ConfigSnapshot};
use crate::stats::ProxyStats;
use crate::timer::NamedTimer;
use crate::writer::{AsyncWriter, WriterSink};

use memrouter_common::msg::{McRequest, Op};
use parking_lot::Mutex;

/// Seed for worker identities; recognizable in core dumps and logs.
static NEXT_MAGIC: AtomicU64 = AtomicU64::new(0x0012_3456_7890_0000);

/// One proxy worker.
///
/// This type is the thread-shareable surface: the reconfiguration driver
/// swaps snapshots and reads stats through it, the front-end submits
/// requests through it. Loop-only mutable state lives in [`WorkerCore`].
pub struct ProxyWorker {
    magic: u64,
    router: Weak<Router>,
    options: ProxyOptions,
    routing_prefix: RoutingPrefix,

    pub stats: ProxyStats,
    config: ConfigHolder,
    destinations: DestinationMap,
    monitor: Mutex<Option<Arc<dyn ClientMonitor>>>,
    rtt_timer: Mutex<Option<NamedTimer>>,

    awriter: AsyncWriter,
    stats_writer: AsyncWriter,

    intake: Mutex<Option<IntakeQueue>>,
    attached: AtomicBool,
    being_destroyed: AtomicBool,
    perform_stats_logging: bool,
}

impl ProxyWorker {
    /// Construct a detached worker.
    ///
    /// Validates the default route up front: an invalid or empty value
    /// refuses to configure the worker.
    pub fn new(
        router: Weak<Router>,
        options: ProxyOptions,
        perform_stats_logging: bool,
    ) -> RouterResult<Arc<Self>> {
        let routing_prefix = RoutingPrefix::parse(&options.default_route)?;

        let magic = NEXT_MAGIC.fetch_add(1, Ordering::Relaxed);
        let rtt_timer = if options.disable_dynamic_stats {
            None
        } else {
            Some(NamedTimer::new("proxy_rtt_timer"))
        };

        let stats_queue_len = options.stats_async_queue_length;
        Ok(Arc::new(Self {
            magic,
            router,
            options,
            routing_prefix,
            stats: ProxyStats::new(),
            config: ConfigHolder::new(),
            destinations: DestinationMap::new(),
            monitor: Mutex::new(None),
            rtt_timer: Mutex::new(rtt_timer),
            awriter: AsyncWriter::new("memrouter-awriter", None),
            stats_writer: AsyncWriter::new("memrouter-statsw", Some(stats_queue_len)),
            intake: Mutex::new(None),
            attached: AtomicBool::new(false),
            being_destroyed: AtomicBool::new(false),
            perform_stats_logging,
        }))
    }

    /// A worker with no router, for hosts embedding a single proxy.
    pub fn standalone(options: ProxyOptions) -> RouterResult<Arc<Self>> {
        Self::new(Weak::new(), options, false)
    }

    /// Bind the worker to the current loop. Must be called exactly once,
    /// on the worker's loop thread inside a `LocalSet`; returns the
    /// loop-side core used to drive requests.
    pub fn attach_event_base(self: &Arc<Self>) -> RouterResult<Rc<WorkerCore>> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return Err(RouterError::lifecycle("event base already attached"));
        }

        let (queue, rx) = IntakeQueue::new(self.options.intake_priority);
        *self.intake.lock() = Some(queue);

        let core = WorkerCore::new(self.clone());
        tokio::task::spawn_local(run_intake(core.clone(), rx));

        let reset_interval = self.options.reset_inactive_connection_interval;
        if reset_interval > Duration::ZERO {
            tokio::task::spawn_local(run_destination_reset(Arc::downgrade(self), reset_interval));
        }

        if self.perform_stats_logging
            && self.router.strong_count() > 0
            && self.options.stats_logging_interval > Duration::ZERO
        {
            tokio::task::spawn_local(run_stats_logger(
                Arc::downgrade(self),
                self.options.stats_logging_interval,
            ));
        }

        if let Some(router) = self.router.upgrade() {
            router.startup_notify();
        }

        debug!(magic = self.magic, "worker attached to event base");
        Ok(core)
    }

    /// Spawn the writer threads: the generic async-log writer (unless
    /// disabled) and the stats writer. On failure no thread is left
    /// running.
    pub fn start_writer_threads(
        &self,
        asynclog_sink: WriterSink,
        stats_sink: WriterSink,
    ) -> RouterResult<()> {
        if !self.options.asynclog_disable {
            self.awriter.start(asynclog_sink)?;
        }
        if let Err(e) = self.stats_writer.start(stats_sink) {
            self.awriter.stop();
            return Err(e);
        }
        Ok(())
    }

    pub fn stop_writer_threads(&self) {
        self.awriter.stop();
        self.stats_writer.stop();
    }

    /// Tear the worker down. The loop must have drained already; no
    /// request may be in flight.
    pub fn shutdown(&self) {
        self.stop_writer_threads();
        self.destinations.reset();
        self.being_destroyed.store(true, Ordering::SeqCst);
        *self.intake.lock() = None;
        *self.rtt_timer.lock() = None;
    }

    /// Submit a request from the front-end.
    ///
    /// Validation failures surface here, synchronously, before anything is
    /// queued.
    pub fn submit(&self, intake: RequestIntake) -> RouterResult<()> {
        intake
            .request
            .validate()
            .map_err(|reason| RouterError::InvalidRequest { reason })?;
        if self.being_destroyed.load(Ordering::SeqCst) {
            return Err(RouterError::lifecycle("worker is being destroyed"));
        }
        self.post_intake(IntakeEntry::Request(intake))
    }

    /// Queue an operational entry onto the loop.
    pub fn post_intake(&self, entry: IntakeEntry) -> RouterResult<()> {
        match &*self.intake.lock() {
            Some(queue) => queue.send(entry),
            None => Err(RouterError::lifecycle("worker not attached")),
        }
    }

    pub(crate) fn intake_sender(&self) -> Option<crate::intake::IntakeSender> {
        self.intake.lock().as_ref().map(|q| q.sender())
    }

    pub fn magic(&self) -> u64 {
        self.magic
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// The worker's default routing prefix.
    pub fn routing_prefix(&self) -> &RoutingPrefix {
        &self.routing_prefix
    }

    pub fn default_region(&self) -> &str {
        self.routing_prefix.region()
    }

    pub fn default_cluster(&self) -> &str {
        self.routing_prefix.cluster()
    }

    pub fn config(&self) -> &ConfigHolder {
        &self.config
    }

    /// The current snapshot, if configured.
    pub fn current_config(&self) -> Option<Arc<ConfigSnapshot>> {
        self.config.get()
    }

    pub fn destinations(&self) -> &DestinationMap {
        &self.destinations
    }

    /// Install or clear the destination health monitor.
    pub fn set_monitor(&self, monitor: Option<Arc<dyn ClientMonitor>>) {
        *self.monitor.lock() = monitor;
    }

    pub fn monitor(&self) -> Option<Arc<dyn ClientMonitor>> {
        self.monitor.lock().clone()
    }

    pub fn being_destroyed(&self) -> bool {
        self.being_destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn awriter(&self) -> &AsyncWriter {
        &self.awriter
    }

    pub(crate) fn stats_writer(&self) -> &AsyncWriter {
        &self.stats_writer
    }

    /// Record one upstream round-trip sample.
    pub fn record_rtt(&self, duration: Duration) {
        if let Some(timer) = &*self.rtt_timer.lock() {
            timer.record(duration);
        }
    }

    /// Copy the RTT aggregates into their stats gauges.
    pub fn flush_rtt_stats(&self) {
        if let Some(timer) = &*self.rtt_timer.lock() {
            self.stats.rtt.store(timer.average_us(), Ordering::Relaxed);
            self.stats.rtt_min.store(timer.min_us(), Ordering::Relaxed);
            self.stats.rtt_max.store(timer.max_us(), Ordering::Relaxed);
        }
    }

    /// Visit every destination client the current snapshot could route the
    /// given key to.
    pub fn for_each_possible_client(&self, key: &str, mut visit: impl FnMut(&ClientConfig)) {
        let Some(snapshot) = self.config.get() else {
            return;
        };
        let probe = McRequest::new(Op::Get, key.to_string());

        fn walk(
            handle: &Arc<dyn crate::routes::RouteHandle>,
            req: &McRequest,
            visit: &mut dyn FnMut(&ClientConfig),
        ) {
            if let Some(client) = handle.client() {
                visit(client);
            }
            for child in handle.could_route_to(req) {
                walk(&child, req, visit);
            }
        }

        walk(snapshot.route(), &probe, &mut visit);
    }
}

// ============================================================================
// Loop-side core
// ============================================================================

/// Loop-thread state of one worker.
///
/// Holds everything only the loop touches: the admission FIFO, the
/// processing count, the RNG, and the pending write-log registry. `!Send`
/// on purpose; handles to it never leave the loop thread.
pub struct WorkerCore {
    worker: Arc<ProxyWorker>,
    weak_self: RcWeak<WorkerCore>,
    pub(crate) waiting: RefCell<VecDeque<RequestRef>>,
    pub(crate) num_processing: Cell<u64>,
    rng: RefCell<SmallRng>,
    pending_logs: RefCell<HashMap<u64, RequestRef>>,
    next_log_id: Cell<u64>,
}

impl std::fmt::Debug for WorkerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerCore")
            .field("num_processing", &self.num_processing.get())
            .field("next_log_id", &self.next_log_id.get())
            .finish()
    }
}

impl WorkerCore {
    fn new(worker: Arc<ProxyWorker>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            worker,
            weak_self: weak_self.clone(),
            waiting: RefCell::new(VecDeque::new()),
            num_processing: Cell::new(0),
            rng: RefCell::new(SmallRng::from_os_rng()),
            pending_logs: RefCell::new(HashMap::new()),
            next_log_id: Cell::new(1),
        })
    }

    pub fn worker(&self) -> &Arc<ProxyWorker> {
        &self.worker
    }

    /// The worker's RNG; only the loop thread may hold the borrow.
    pub fn rng(&self) -> RefMut<'_, SmallRng> {
        self.rng.borrow_mut()
    }

    pub fn num_requests_processing(&self) -> u64 {
        self.num_processing.get()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.borrow().len()
    }

    pub(crate) fn rc(&self) -> Option<Rc<WorkerCore>> {
        self.weak_self.upgrade()
    }

    pub(crate) fn release_processing_slot(&self) {
        let current = self.num_processing.get();
        debug_assert!(current > 0);
        self.num_processing.set(current.saturating_sub(1));
        crate::stats::decr(&self.worker.stats.reqs_processing);
    }

    /// Queue a write-log entry for this request on the generic writer,
    /// holding its reply until the write resolves.
    pub fn post_async_log(&self, preq: &RequestRef, payload: bytes::Bytes) -> RouterResult<()> {
        let Some(tx) = self.worker.intake_sender() else {
            return Err(RouterError::lifecycle("worker not attached"));
        };

        let id = self.next_log_id.get();
        self.next_log_id.set(id + 1);

        preq.delay_reply_inc();
        self.pending_logs.borrow_mut().insert(id, preq.clone());

        let entry = crate::writer::WriteEntry::new(payload).with_completion(Box::new(
            move |result| {
                let entry = match result {
                    Ok(()) => IntakeEntry::WriteLogDone(id),
                    Err(_) => IntakeEntry::WriteLogFailed(id),
                };
                let _ = tx.send(entry);
            },
        ));

        if let Err(e) = self.worker.awriter().post(entry) {
            let removed = self.pending_logs.borrow_mut().remove(&id);
            if let Some(preq) = removed {
                preq.delay_reply_dec();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Number of write-log entries still pending.
    pub fn pending_log_count(&self) -> usize {
        self.pending_logs.borrow().len()
    }

    /// A write-log entry completed; release the delay once the count
    /// drains.
    pub(crate) fn on_write_log_done(&self, id: u64) {
        let removed = self.pending_logs.borrow_mut().remove(&id);
        if let Some(preq) = removed {
            preq.delay_reply_dec();
            if preq.reply_state() == crate::request::ReplyState::ReplyDelayed
                && preq.delay_reply_count() == 0
            {
                preq.continue_send_reply();
            }
        }
    }

    /// A write-log entry failed. A delayed reply is released only when the
    /// delay count is exactly one; the entry itself is always retired.
    pub(crate) fn on_write_log_failure(&self, id: u64) {
        let removed = self.pending_logs.borrow_mut().remove(&id);
        if let Some(preq) = removed {
            if preq.reply_state() == crate::request::ReplyState::ReplyDelayed
                && preq.delay_reply_count() == 1
            {
                preq.continue_send_reply();
            }
        }
    }
}

// ============================================================================
// Loop tasks
// ============================================================================

async fn run_intake(core: Rc<WorkerCore>, mut rx: IntakeReceiver) {
    while let Some(entry) = rx.recv().await {
        match entry {
            IntakeEntry::Request(intake) => {
                if let Err(e) = core.dispatch_intake(intake) {
                    warn!(error = %e, "dropping unroutable intake request");
                }
            }
            IntakeEntry::OldConfig(old) => {
                debug!(digest = %old.digest(), "retiring old config snapshot");
                drop(old);
            }
            IntakeEntry::WriteLogDone(id) => core.on_write_log_done(id),
            IntakeEntry::WriteLogFailed(id) => core.on_write_log_failure(id),
            IntakeEntry::Operational(work) => work(),
        }
    }
    debug!(
        magic = core.worker().magic(),
        "intake queue closed, worker loop draining"
    );
}

async fn run_destination_reset(worker: Weak<ProxyWorker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(worker) = worker.upgrade() else {
            break;
        };
        if worker.being_destroyed() {
            break;
        }
        let retired = worker.destinations().retire_unused();
        if retired > 0 {
            debug!(retired, "retired inactive destinations");
        }
    }
}

async fn run_stats_logger(worker: Weak<ProxyWorker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(worker) = worker.upgrade() else {
            break;
        };
        if worker.being_destroyed() {
            break;
        }
        worker.flush_rtt_stats();

        let mut line = String::new();
        for (name, value) in worker.stats.snapshot() {
            line.push_str(name);
            line.push(' ');
            line.push_str(&value.to_string());
            line.push('\n');
        }
        // Stats lines are best effort; a full queue just drops this tick.
        let _ = worker
            .stats_writer()
            .post(crate::writer::WriteEntry::new(line.into_bytes()));
    }
}
