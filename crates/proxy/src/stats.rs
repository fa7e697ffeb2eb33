//! Per-worker stats counters
//!
//! Word-sized counters updated on the worker's loop thread and read
//! unlocked from anywhere; readers tolerate skew. Everything here is
//! monotonically non-decreasing except the paired processing/waiting/
//! outstanding gauges and the rtt/num_servers/config values, which are set
//! wholesale.

use memrouter_common::msg::Op;
use memrouter_common::{McReply, ReplyResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// The counter set one worker maintains.
#[derive(Debug, Default)]
pub struct ProxyStats {
    // Gauges
    pub request_num_outstanding: AtomicU64,
    pub reqs_processing: AtomicU64,
    pub reqs_waiting: AtomicU64,
    pub num_servers: AtomicU64,
    pub config_last_success: AtomicU64,

    // Request flow counters
    pub request_sent: AtomicU64,
    pub request_sent_count: AtomicU64,
    pub request_replied: AtomicU64,
    pub request_replied_count: AtomicU64,
    pub request_success: AtomicU64,
    pub request_success_count: AtomicU64,
    pub request_error: AtomicU64,
    pub request_error_count: AtomicU64,

    // Per-op counters
    pub cmd_get: AtomicU64,
    pub cmd_get_count: AtomicU64,
    pub cmd_metaget: AtomicU64,
    pub cmd_add: AtomicU64,
    pub cmd_add_count: AtomicU64,
    pub cmd_replace: AtomicU64,
    pub cmd_replace_count: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_set_count: AtomicU64,
    pub cmd_incr: AtomicU64,
    pub cmd_incr_count: AtomicU64,
    pub cmd_decr: AtomicU64,
    pub cmd_decr_count: AtomicU64,
    pub cmd_delete: AtomicU64,
    pub cmd_delete_count: AtomicU64,
    pub cmd_lease_set: AtomicU64,
    pub cmd_lease_set_count: AtomicU64,
    pub cmd_lease_get: AtomicU64,
    pub cmd_lease_get_count: AtomicU64,
    pub cmd_stats: AtomicU64,
    pub cmd_stats_count: AtomicU64,
    pub cmd_other: AtomicU64,
    pub cmd_other_count: AtomicU64,

    // Round-trip gauges, set by the rtt flush
    pub rtt: AtomicU64,
    pub rtt_min: AtomicU64,
    pub rtt_max: AtomicU64,
}

#[inline]
pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn decr(counter: &AtomicU64) {
    counter.fetch_sub(1, Ordering::Relaxed);
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the per-op counter pair for a request entering processing.
    /// `metaget` has no `_count` variant; ops without a dedicated counter
    /// land in the `other` bucket.
    pub fn bump_cmd(&self, op: Op) {
        match op {
            Op::Stats => {
                incr(&self.cmd_stats);
                incr(&self.cmd_stats_count);
            }
            Op::Get => {
                incr(&self.cmd_get);
                incr(&self.cmd_get_count);
            }
            Op::Metaget => {
                incr(&self.cmd_metaget);
            }
            Op::Add => {
                incr(&self.cmd_add);
                incr(&self.cmd_add_count);
            }
            Op::Replace => {
                incr(&self.cmd_replace);
                incr(&self.cmd_replace_count);
            }
            Op::Set => {
                incr(&self.cmd_set);
                incr(&self.cmd_set_count);
            }
            Op::Incr => {
                incr(&self.cmd_incr);
                incr(&self.cmd_incr_count);
            }
            Op::Decr => {
                incr(&self.cmd_decr);
                incr(&self.cmd_decr_count);
            }
            Op::Delete => {
                incr(&self.cmd_delete);
                incr(&self.cmd_delete_count);
            }
            Op::LeaseSet => {
                incr(&self.cmd_lease_set);
                incr(&self.cmd_lease_set_count);
            }
            Op::LeaseGet => {
                incr(&self.cmd_lease_get);
                incr(&self.cmd_lease_get_count);
            }
            _ => {
                incr(&self.cmd_other);
                incr(&self.cmd_other_count);
            }
        }
    }

    /// Bump the reply accounting pair for a finished request.
    pub fn bump_replied(&self, result: ReplyResult) {
        incr(&self.request_replied);
        incr(&self.request_replied_count);
        if result.is_error() {
            incr(&self.request_error);
            incr(&self.request_error_count);
        } else {
            incr(&self.request_success);
            incr(&self.request_success_count);
        }
    }

    /// All counters as `(name, value)` pairs, in stable order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        macro_rules! row {
            ($name:literal, $field:ident) => {
                ($name, self.$field.load(Ordering::Relaxed))
            };
        }
        vec![
            row!("proxy_request_num_outstanding", request_num_outstanding),
            row!("proxy_reqs_processing", reqs_processing),
            row!("proxy_reqs_waiting", reqs_waiting),
            row!("num_servers", num_servers),
            row!("config_last_success", config_last_success),
            row!("request_sent", request_sent),
            row!("request_sent_count", request_sent_count),
            row!("request_replied", request_replied),
            row!("request_replied_count", request_replied_count),
            row!("request_success", request_success),
            row!("request_success_count", request_success_count),
            row!("request_error", request_error),
            row!("request_error_count", request_error_count),
            row!("cmd_get", cmd_get),
            row!("cmd_get_count", cmd_get_count),
            row!("cmd_metaget", cmd_metaget),
            row!("cmd_add", cmd_add),
            row!("cmd_add_count", cmd_add_count),
            row!("cmd_replace", cmd_replace),
            row!("cmd_replace_count", cmd_replace_count),
            row!("cmd_set", cmd_set),
            row!("cmd_set_count", cmd_set_count),
            row!("cmd_incr", cmd_incr),
            row!("cmd_incr_count", cmd_incr_count),
            row!("cmd_decr", cmd_decr),
            row!("cmd_decr_count", cmd_decr_count),
            row!("cmd_delete", cmd_delete),
            row!("cmd_delete_count", cmd_delete_count),
            row!("cmd_lease_set", cmd_lease_set),
            row!("cmd_lease_set_count", cmd_lease_set_count),
            row!("cmd_lease_get", cmd_lease_get),
            row!("cmd_lease_get_count", cmd_lease_get_count),
            row!("cmd_stats", cmd_stats),
            row!("cmd_stats_count", cmd_stats_count),
            row!("cmd_other", cmd_other),
            row!("cmd_other_count", cmd_other_count),
            row!("rtt", rtt),
            row!("rtt_min", rtt_min),
            row!("rtt_max", rtt_max),
        ]
    }
}

/// Materialize the reply for a `stats` request.
///
/// An empty key returns every counter; a non-empty key filters counters by
/// name prefix. Lines follow the memcached text form, `STAT <name> <value>`.
pub fn stats_reply(stats: &ProxyStats, key: &str) -> McReply {
    let mut body = String::new();
    for (name, value) in stats.snapshot() {
        if !key.is_empty() && !name.starts_with(key) {
            continue;
        }
        body.push_str("STAT ");
        body.push_str(name);
        body.push(' ');
        body.push_str(&value.to_string());
        body.push_str("\r\n");
    }
    body.push_str("END\r\n");
    McReply::with_message(Op::Stats, ReplyResult::Ok, body)
}
