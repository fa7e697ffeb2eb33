//! Per-request state
//!
//! A request lives on its worker's loop from intake to teardown. The
//! handle type [`RequestRef`] counts references: the admission queue, the
//! routing task, and transient callers each hold one. When the last handle
//! drops, deferred callbacks flush and the request tears down, releasing
//! its admission slot and pumping the next waiter.
//!
//! The reply is a write-once latch. It is set exactly once, and the client
//! callback observes it exactly once, either immediately or after the
//! delay-reply count drains.

use memrouter_common::msg::{McReply, McRequest, Op};
use memrouter_common::{RouterError, RouterResult};
use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::intake::{RequestCallback, RequestIntake};
use crate::stats::{decr, incr};
use crate::worker::WorkerCore;

/// Key prefix that turns a plain `get` into a service-info request.
pub const INTERNAL_GET_PREFIX: &str = "__mcrouter__.";

/// Reply latch states. Transitions only move forward:
/// `NoReply -> (ReplyDelayed)? -> Replied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    NoReply,
    ReplyDelayed,
    Replied,
}

/// State of one in-flight request.
pub struct ProxyRequest {
    core: Rc<WorkerCore>,
    /// The request as routed; ops may differ from what the client sent
    /// after the legacy service-info rewrite.
    routed: McRequest,
    client_op: Op,
    legacy_service_info: bool,
    sender_id: u64,
    context: RefCell<Option<Box<dyn Any + Send>>>,

    reply: RefCell<Option<McReply>>,
    reply_state: Cell<ReplyState>,
    delay_reply: Cell<u32>,
    processing: Cell<bool>,
    finalized: Cell<bool>,

    reply_ready: RefCell<Option<RequestCallback>>,
    on_complete: RefCell<Option<RequestCallback>>,
}

impl ProxyRequest {
    /// Build a request from an intake entry.
    ///
    /// Fails on operational validation without taking a reference; the
    /// caller sees the error synchronously.
    pub(crate) fn new(core: Rc<WorkerCore>, intake: RequestIntake) -> RouterResult<RequestRef> {
        intake
            .request
            .validate()
            .map_err(|reason| RouterError::InvalidRequest { reason })?;

        let client_op = intake.request.op;
        let (routed, legacy_service_info) = rewrite_legacy(intake.request);

        let preq = Rc::new(ProxyRequest {
            core,
            routed,
            client_op,
            legacy_service_info,
            sender_id: intake.sender_id,
            context: RefCell::new(intake.context),
            reply: RefCell::new(None),
            reply_state: Cell::new(ReplyState::NoReply),
            delay_reply: Cell::new(0),
            processing: Cell::new(false),
            finalized: Cell::new(false),
            reply_ready: RefCell::new(Some(intake.reply_ready)),
            on_complete: RefCell::new(intake.on_complete),
        });
        incr(&preq.core.worker().stats.request_num_outstanding);
        Ok(RequestRef(preq))
    }

    /// The request as seen by routing.
    pub fn routed(&self) -> &McRequest {
        &self.routed
    }

    /// The operation the client originally sent.
    pub fn client_op(&self) -> Op {
        self.client_op
    }

    pub fn sender_id(&self) -> u64 {
        self.sender_id
    }

    /// Whether this request arrived as a legacy `__mcrouter__.` get.
    pub fn is_legacy_service_info(&self) -> bool {
        self.legacy_service_info
    }

    pub fn reply_state(&self) -> ReplyState {
        self.reply_state.get()
    }

    /// The stored reply, once set.
    pub fn reply(&self) -> Ref<'_, Option<McReply>> {
        self.reply.borrow()
    }

    /// Take the opaque host context out of the request.
    pub fn take_context(&self) -> Option<Box<dyn Any + Send>> {
        self.context.borrow_mut().take()
    }

    pub(crate) fn processing(&self) -> bool {
        self.processing.get()
    }

    pub(crate) fn set_processing(&self) {
        self.processing.set(true);
    }

    pub fn delay_reply_count(&self) -> u32 {
        self.delay_reply.get()
    }

    /// Hold the reply until an external subsystem releases the delay.
    pub fn delay_reply_inc(&self) {
        self.delay_reply.set(self.delay_reply.get() + 1);
    }

    pub(crate) fn delay_reply_dec(&self) {
        let current = self.delay_reply.get();
        debug_assert!(current > 0);
        self.delay_reply.set(current.saturating_sub(1));
    }

    /// Set the reply.
    ///
    /// The reply's op is fixed up before storing: a legacy service-info
    /// request reports `get` back to the client, everything else reports
    /// the op the client sent. If the delay-reply count is nonzero the
    /// latch parks in `ReplyDelayed` until released.
    pub fn send_reply(&self, reply: McReply) {
        debug_assert!(self.reply.borrow().is_none(), "reply already set");
        if self.reply.borrow().is_some() {
            return;
        }

        let mut reply = reply;
        reply.op = if self.legacy_service_info {
            Op::Get
        } else {
            self.client_op
        };
        *self.reply.borrow_mut() = Some(reply);

        if self.reply_state.get() != ReplyState::NoReply {
            return;
        }

        if self.delay_reply.get() == 0 {
            self.continue_send_reply();
        } else {
            self.reply_state.set(ReplyState::ReplyDelayed);
        }
    }

    /// Deliver the stored reply.
    ///
    /// In async mode the reply callback fires here; in sync mode it is
    /// deferred until the last reference drops.
    pub(crate) fn continue_send_reply(&self) {
        self.reply_state.set(ReplyState::Replied);

        let worker = self.core.worker();
        if !worker.options().sync_mode {
            let cb = self.reply_ready.borrow_mut().take();
            if let Some(cb) = cb {
                cb(self);
            }
        }

        debug_assert!(self.reply.borrow().is_some(), "latch released without a reply");
        let result = self.reply.borrow().as_ref().map(|r| r.result);
        if let Some(result) = result {
            worker.stats.bump_replied(result);
        }
    }

    /// Runs when the last handle is dropping: flush the reply callback if
    /// sync mode deferred it, then fire the completion callback.
    fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }

        let worker = self.core.worker();
        if worker.options().sync_mode && self.reply_state.get() == ReplyState::Replied {
            let cb = self.reply_ready.borrow_mut().take();
            if let Some(cb) = cb {
                cb(self);
            }
        }
        let cb = self.on_complete.borrow_mut().take();
        if let Some(cb) = cb {
            cb(self);
        }
    }
}

impl Drop for ProxyRequest {
    fn drop(&mut self) {
        if self.processing.get() {
            self.core.release_processing_slot();
            self.core.pump();
        }
        decr(&self.core.worker().stats.request_num_outstanding);
    }
}

impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("op", &self.routed.op)
            .field("key", &self.routed.key_str())
            .field("reply_state", &self.reply_state.get())
            .field("processing", &self.processing.get())
            .finish()
    }
}

/// Counted handle to a request.
///
/// Cloning takes a reference; dropping releases it. The last drop flushes
/// deferred callbacks and tears the request down.
pub struct RequestRef(Rc<ProxyRequest>);

impl RequestRef {
    /// Current reference count, for diagnostics.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Queue a write-log line on the worker's generic async writer and
    /// hold this request's reply until the write resolves.
    pub fn post_async_log(&self, payload: bytes::Bytes) -> RouterResult<()> {
        self.0.core.post_async_log(self, payload)
    }
}

impl Clone for RequestRef {
    fn clone(&self) -> Self {
        RequestRef(self.0.clone())
    }
}

impl Deref for RequestRef {
    type Target = ProxyRequest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for RequestRef {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) == 1 {
            self.0.finalize();
        }
    }
}

impl fmt::Debug for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rewrite a legacy `get __mcrouter__.<key>` into `get_service_info <key>`.
///
/// The routed op changes; the reply's op is restored to `get` on the way
/// out so the client sees a normal get reply.
pub(crate) fn rewrite_legacy(req: McRequest) -> (McRequest, bool) {
    if req.op == Op::Get && req.key.starts_with(INTERNAL_GET_PREFIX.as_bytes()) {
        let mut rewritten = req;
        rewritten.op = Op::GetServiceInfo;
        rewritten.key = rewritten.key.slice(INTERNAL_GET_PREFIX.len()..);
        (rewritten, true)
    } else {
        (req, false)
    }
}
