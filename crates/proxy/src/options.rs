//! Worker options
//!
//! Immutable per-worker settings, fixed at construction. Routing behavior
//! lives in the hot-swappable config snapshot instead; nothing here changes
//! at runtime.

use std::time::Duration;

/// Options for a single proxy worker.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Routing prefix requests default into, `/region/cluster/` form.
    /// An invalid or empty value fails worker construction.
    pub default_route: String,

    /// Cap on concurrently processed requests; `0` disables admission
    /// control entirely.
    pub max_inflight_requests: u64,

    /// In sync mode the reply callback is deferred to request teardown and
    /// no old-config retirement entries are posted.
    pub sync_mode: bool,

    /// Disables the RTT timer and the per-request latency timer.
    pub disable_dynamic_stats: bool,

    /// Skips spawning the generic async-log writer thread.
    pub asynclog_disable: bool,

    /// Queue capacity for the stats writer; the generic writer is unbounded.
    pub stats_async_queue_length: usize,

    /// Period of the stats logger task; `Duration::ZERO` disables it.
    pub stats_logging_interval: Duration,

    /// Period of the inactive-destination sweep; `Duration::ZERO` disables
    /// it.
    pub reset_inactive_connection_interval: Duration,

    /// Priority recorded on the intake queue. The runtime schedules tasks
    /// without priorities, so this is carried for the host and for
    /// introspection.
    pub intake_priority: u8,

    /// Suppresses the per-reconfiguration summary log line when configs are
    /// reloaded in a tight loop.
    pub constantly_reload_configs: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            default_route: "/default/default/".to_string(),
            max_inflight_requests: 1024,
            sync_mode: false,
            disable_dynamic_stats: false,
            asynclog_disable: false,
            stats_async_queue_length: 100,
            stats_logging_interval: Duration::from_secs(10),
            reset_inactive_connection_interval: Duration::from_secs(25),
            intake_priority: 0,
            constantly_reload_configs: false,
        }
    }
}
