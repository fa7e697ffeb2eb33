//! Request intake queue
//!
//! The front-end hands parsed requests to the owning worker through this
//! queue; the worker's loop is its only consumer. Beyond requests the queue
//! carries a few operational entries: old-config retirement after a swap,
//! write-log completions from the async writer threads, and an escape hatch
//! for host-defined loop work.

use memrouter_common::msg::McRequest;
use memrouter_common::{RouterError, RouterResult};
use std::any::Any;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::request::ProxyRequest;
use crate::snapshot::ConfigSnapshot;

/// Callback invoked on the loop with the finished request.
pub type RequestCallback = Box<dyn FnOnce(&ProxyRequest) + Send>;

/// One inbound request with its delivery callbacks.
pub struct RequestIntake {
    /// The parsed request.
    pub request: McRequest,
    /// Identity of the submitting client connection.
    pub sender_id: u64,
    /// Opaque host context, retrievable from the request during callbacks.
    pub context: Option<Box<dyn Any + Send>>,
    /// Invoked once when the reply is ready to be enqueued to the client.
    pub reply_ready: RequestCallback,
    /// Invoked once when the request is complete, before teardown.
    pub on_complete: Option<RequestCallback>,
}

impl RequestIntake {
    pub fn new(request: McRequest, sender_id: u64, reply_ready: RequestCallback) -> Self {
        Self {
            request,
            sender_id,
            context: None,
            reply_ready,
            on_complete: None,
        }
    }

    pub fn with_context(mut self, context: Box<dyn Any + Send>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_completion(mut self, on_complete: RequestCallback) -> Self {
        self.on_complete = Some(on_complete);
        self
    }
}

/// Entries the worker's loop consumes.
pub enum IntakeEntry {
    /// A client request.
    Request(RequestIntake),
    /// A retired config snapshot whose last reference the loop should drop.
    OldConfig(Arc<ConfigSnapshot>),
    /// The async writer finished the identified write-log entry.
    WriteLogDone(u64),
    /// The async writer failed the identified write-log entry.
    WriteLogFailed(u64),
    /// Host-defined work to run on the loop.
    Operational(Box<dyn FnOnce() + Send>),
}

pub(crate) type IntakeSender = mpsc::UnboundedSender<IntakeEntry>;
pub(crate) type IntakeReceiver = mpsc::UnboundedReceiver<IntakeEntry>;

/// Sending side of a worker's intake queue.
pub struct IntakeQueue {
    tx: IntakeSender,
    priority: u8,
}

impl IntakeQueue {
    pub(crate) fn new(priority: u8) -> (Self, IntakeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, priority }, rx)
    }

    pub fn send(&self, entry: IntakeEntry) -> RouterResult<()> {
        self.tx
            .send(entry)
            .map_err(|_| RouterError::lifecycle("intake queue closed"))
    }

    /// Priority the queue was created at.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub(crate) fn sender(&self) -> IntakeSender {
        self.tx.clone()
    }
}
