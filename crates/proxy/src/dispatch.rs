//! Admission and request dispatch
//!
//! Every request enters through `dispatch_request`: operational ops bypass
//! admission entirely, everything else either starts processing or joins
//! the waiting FIFO when the in-flight cap is reached. `pump` is the sole
//! path that admits queued requests, driven from request teardown.
//!
//! Routing runs on a spawned loop task: the route tree produces a reply
//! (or an error, converted to a `local_error` reply), the reply is
//! delivered, and only then is the request's snapshot pin released.

use memrouter_common::msg::{McReply, Op};
use memrouter_common::RouterResult;
use tracing::trace;

use crate::intake::RequestIntake;
use crate::request::{ProxyRequest, RequestRef};
use crate::routes::RequestContext;
use crate::stats::{decr, incr, stats_reply};
use crate::timer::on_request_timer;
use crate::worker::WorkerCore;

/// Operational requests that are never queued behind admission control.
pub fn is_bypass_op(op: Op) -> bool {
    matches!(op, Op::Stats | Op::Version | Op::GetServiceInfo)
}

impl WorkerCore {
    /// Build a request from an intake entry and run admission on it.
    pub fn dispatch_intake(&self, intake: RequestIntake) -> RouterResult<()> {
        let Some(core) = self.rc() else {
            return Err(memrouter_common::RouterError::lifecycle(
                "worker loop is shutting down",
            ));
        };
        let preq = ProxyRequest::new(core, intake)?;
        self.dispatch_request(preq);
        Ok(())
    }

    /// Admission entry point.
    pub fn dispatch_request(&self, preq: RequestRef) {
        if self.rate_limited(&preq) {
            self.waiting.borrow_mut().push_back(preq.clone());
            incr(&self.worker().stats.reqs_waiting);
            trace!(
                key = %preq.routed().key_str(),
                waiting = self.waiting_len(),
                "request queued behind admission control"
            );
        } else {
            self.process_request(&preq);
        }
    }

    /// Whether this request must wait for an admission slot.
    fn rate_limited(&self, preq: &RequestRef) -> bool {
        let max_inflight = self.worker().options().max_inflight_requests;
        if max_inflight == 0 {
            return false;
        }

        // Operational requests always go straight through.
        if is_bypass_op(preq.routed().op) {
            return false;
        }

        if self.waiting.borrow().is_empty() && self.num_processing.get() < max_inflight {
            return false;
        }

        true
    }

    /// Start processing one admitted request.
    pub(crate) fn process_request(&self, preq: &RequestRef) {
        debug_assert!(!preq.processing());
        preq.set_processing();
        self.num_processing.set(self.num_processing.get() + 1);

        let stats = &self.worker().stats;
        incr(&stats.reqs_processing);

        let dynamic_stats = !self.worker().options().disable_dynamic_stats;
        let timer = dynamic_stats.then(|| on_request_timer().start());

        stats.bump_cmd(preq.routed().op);

        self.route_request(preq);

        incr(&stats.request_sent);
        incr(&stats.request_sent_count);
        drop(timer);
    }

    /// Resolve one request through the route-handle surface.
    fn route_request(&self, preq: &RequestRef) {
        let op = preq.routed().op;

        // stats is answered synchronously from the counters.
        if op == Op::Stats {
            let key = preq.routed().key_str().into_owned();
            let reply = stats_reply(&self.worker().stats, &key);
            preq.send_reply(reply);
            return;
        }

        // service-info is answered by the config's handler, which owns
        // replying.
        if op == Op::GetServiceInfo {
            match self.worker().current_config() {
                Some(snapshot) => {
                    let ctx = RequestContext::for_request(snapshot.clone(), preq.clone());
                    snapshot.service_info().handle_request(preq, ctx);
                }
                None => {
                    preq.send_reply(McReply::local_error(op, "no configuration loaded"));
                }
            }
            return;
        }

        let Some(core) = self.rc() else {
            // Loop teardown: nothing left to route on.
            preq.send_reply(McReply::local_error(op, "worker loop is shutting down"));
            return;
        };
        let preq = preq.clone();

        tokio::task::spawn_local(async move {
            let (reply, ctx) = match core.worker().current_config() {
                Some(snapshot) => {
                    let ctx = RequestContext::for_request(snapshot.clone(), preq.clone());
                    let routed = preq.routed().clone();
                    let reply = match snapshot.route().dispatch(routed, ctx.clone()).await {
                        Ok(mut reply) => {
                            reply.op = preq.routed().op;
                            reply
                        }
                        Err(e) => McReply::local_error(
                            preq.routed().op,
                            format!("error routing {}: {}", preq.routed().key_str(), e),
                        ),
                    };
                    (reply, Some(ctx))
                }
                None => (
                    McReply::local_error(preq.routed().op, "no configuration loaded"),
                    None,
                ),
            };

            preq.send_reply(reply);
            // The snapshot pin is released only after the reply is out;
            // dropping it can retire a stale config.
            drop(ctx);
            // preq drops here, releasing the reference taken at spawn.
        });
    }

    /// Admit queued requests while slots are free. This is the only path
    /// that makes progress on the waiting FIFO.
    pub fn pump(&self) {
        let max_inflight = self.worker().options().max_inflight_requests;
        loop {
            if self.num_processing.get() >= max_inflight {
                break;
            }
            let next = self.waiting.borrow_mut().pop_front();
            let Some(preq) = next else {
                break;
            };
            decr(&self.worker().stats.reqs_waiting);
            self.process_request(&preq);
            // The queue's reference releases here.
            drop(preq);
        }
    }
}
