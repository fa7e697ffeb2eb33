//! Shared harness for proxy integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use memrouter_proxy::{
    config_digest, ConfigSnapshot, McReply, McRequest, Op, ProxyOptions, ProxyWorker, ReplyResult,
    RequestContext, RequestIntake, RequestRef, RouteHandle, ServiceInfo, WorkerCore,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Give spawned loop tasks a chance to run.
pub async fn drain() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// A route whose requests park until the test completes them by key.
pub struct ManualRoute {
    started: Mutex<Vec<String>>,
    pending: Mutex<HashMap<String, Vec<oneshot::Sender<McReply>>>>,
}

impl ManualRoute {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Keys in the order routing started on them.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    /// Complete one parked request for `key` with the given reply.
    pub fn complete(&self, key: &str, reply: McReply) -> bool {
        let sender = {
            let mut pending = self.pending.lock();
            pending.get_mut(key).and_then(|v| {
                if v.is_empty() {
                    None
                } else {
                    Some(v.remove(0))
                }
            })
        };
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn complete_ok(&self, key: &str) -> bool {
        self.complete(key, McReply::of(Op::Get, ReplyResult::Ok))
    }
}

#[async_trait(?Send)]
impl RouteHandle for ManualRoute {
    async fn dispatch(&self, req: McRequest, _ctx: RequestContext) -> anyhow::Result<McReply> {
        let key = req.key_str().into_owned();
        let (tx, rx) = oneshot::channel();
        self.started.lock().push(key.clone());
        self.pending.lock().entry(key).or_default().push(tx);
        let reply = rx.await.map_err(|_| anyhow::anyhow!("route gate dropped"))?;
        Ok(reply)
    }
}

/// A route that answers immediately, tagging replies so tests can tell
/// which snapshot served them.
pub struct TaggedRoute {
    pub tag: String,
}

impl TaggedRoute {
    pub fn new(tag: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { tag: tag.into() })
    }
}

#[async_trait(?Send)]
impl RouteHandle for TaggedRoute {
    async fn dispatch(&self, req: McRequest, _ctx: RequestContext) -> anyhow::Result<McReply> {
        Ok(McReply::with_message(
            req.op,
            ReplyResult::Ok,
            format!("{}:{}", self.tag, req.key_str()),
        ))
    }
}

/// A route that always fails with the given message.
pub struct FailingRoute {
    pub message: String,
}

impl FailingRoute {
    pub fn new(message: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
        })
    }
}

#[async_trait(?Send)]
impl RouteHandle for FailingRoute {
    async fn dispatch(&self, _req: McRequest, _ctx: RequestContext) -> anyhow::Result<McReply> {
        Err(anyhow::anyhow!(self.message.clone()))
    }
}

/// Service-info handler that records what it saw and answers directly.
pub struct RecordingServiceInfo {
    pub seen: Mutex<Vec<(Op, String)>>,
}

impl RecordingServiceInfo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl ServiceInfo for RecordingServiceInfo {
    fn handle_request(&self, preq: &RequestRef, _ctx: RequestContext) {
        let key = preq.routed().key_str().into_owned();
        self.seen.lock().push((preq.routed().op, key.clone()));
        preq.send_reply(McReply::with_message(
            Op::GetServiceInfo,
            ReplyResult::Ok,
            format!("info:{}", key),
        ));
    }
}

/// Build a snapshot around one route.
pub fn snapshot_with_route(route: Arc<dyn RouteHandle>, text: &str) -> Arc<ConfigSnapshot> {
    Arc::new(ConfigSnapshot::new(
        route,
        HashMap::new(),
        HashMap::new(),
        RecordingServiceInfo::new(),
        config_digest(text),
    ))
}

/// Build a snapshot with an explicit service-info handler.
pub fn snapshot_with_service_info(
    route: Arc<dyn RouteHandle>,
    service_info: Arc<RecordingServiceInfo>,
    text: &str,
) -> Arc<ConfigSnapshot> {
    Arc::new(ConfigSnapshot::new(
        route,
        HashMap::new(),
        HashMap::new(),
        service_info,
        config_digest(text),
    ))
}

/// A worker attached to the current `LocalSet`.
pub struct TestWorker {
    pub worker: Arc<ProxyWorker>,
    pub core: Rc<WorkerCore>,
    pub completions: Arc<AtomicUsize>,
}

impl TestWorker {
    /// Build and attach a worker; must run inside a `LocalSet`.
    pub fn start(options: ProxyOptions) -> Self {
        let worker = ProxyWorker::standalone(options).expect("worker options must be valid");
        let core = worker.attach_event_base().expect("attach once");
        Self {
            worker,
            core,
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Install a snapshot directly.
    pub fn install(&self, snapshot: Arc<ConfigSnapshot>) {
        memrouter_proxy::config_swap(&self.worker, snapshot);
    }

    /// Submit a request; the returned receiver resolves with the reply.
    pub fn enqueue(&self, request: McRequest) -> oneshot::Receiver<McReply> {
        let (tx, rx) = oneshot::channel();
        let completions = self.completions.clone();
        let intake = RequestIntake::new(
            request,
            1,
            Box::new(move |preq| {
                let reply = preq.reply().clone().expect("reply set before callback");
                let _ = tx.send(reply);
            }),
        )
        .with_completion(Box::new(move |_| {
            completions.fetch_add(1, Ordering::SeqCst);
        }));
        self.worker.submit(intake).expect("submit");
        rx
    }

    pub fn waiting_stat(&self) -> u64 {
        self.worker
            .stats
            .reqs_waiting
            .load(Ordering::Relaxed)
    }

    pub fn processing_stat(&self) -> u64 {
        self.worker
            .stats
            .reqs_processing
            .load(Ordering::Relaxed)
    }

    pub fn outstanding_stat(&self) -> u64 {
        self.worker
            .stats
            .request_num_outstanding
            .load(Ordering::Relaxed)
    }
}

/// Submit a request on a bare worker handle; the receiver resolves with
/// the reply.
pub fn enqueue_on(
    worker: &Arc<ProxyWorker>,
    request: McRequest,
) -> oneshot::Receiver<McReply> {
    let (tx, rx) = oneshot::channel();
    let intake = RequestIntake::new(
        request,
        1,
        Box::new(move |preq| {
            let reply = preq.reply().clone().expect("reply set before callback");
            let _ = tx.send(reply);
        }),
    );
    worker.submit(intake).expect("submit");
    rx
}

/// A set request with a small payload.
pub fn set_req(key: &str) -> McRequest {
    McRequest::new(Op::Set, key.to_string()).with_value("v")
}

pub fn get_req(key: &str) -> McRequest {
    McRequest::new(Op::Get, key.to_string())
}
