//! memrouter proxy engine
//!
//! The per-worker core of a sharded memcached routing proxy. Clients speak
//! the memcached protocol to a front-end codec; each parsed request is
//! handed to the worker owning the connection, flows through admission
//! control and the config snapshot's route-handle tree, and comes back as
//! exactly one reply.
//!
//! This crate provides:
//!
//! - **Worker lifecycle**: event-loop attachment, writer threads, teardown
//! - **Admission**: bounded in-flight processing with FIFO queuing and an
//!   operational-request bypass
//! - **Dispatch**: cooperative routing tasks with snapshot pinning and
//!   error-to-reply conversion
//! - **Hot reconfiguration**: all-or-nothing snapshot swaps across workers
//! - **Shadowing policy**: versioned policy data with runtime-variable
//!   driven live updates
//! - **Introspection**: per-worker stats counters and the `stats` /
//!   service-info fast paths

// ============================================================================
// Module Declarations
// ============================================================================

pub mod dispatch;
pub mod intake;
pub mod options;
pub mod reconfigure;
pub mod request;
pub mod routes;
pub mod shadow_store;
pub mod snapshot;
pub mod stats;
pub mod timer;
pub mod worker;
pub mod writer;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Worker lifecycle
pub use options::ProxyOptions;
pub use worker::{ProxyWorker, WorkerCore};

// Request model
pub use request::{ProxyRequest, ReplyState, RequestRef, INTERNAL_GET_PREFIX};

// Intake
pub use intake::{IntakeEntry, IntakeQueue, RequestIntake};

// Admission
pub use dispatch::is_bypass_op;

// Route-handle surface
pub use routes::{ClientConfig, ClientMonitor, DestinationMap, RequestContext, RouteHandle, ServiceInfo};

// Config snapshots
pub use snapshot::{config_digest, config_swap, ConfigHolder, ConfigSnapshot};

// Reconfiguration
pub use reconfigure::{ConfigApi, Router, SnapshotBuilder, SnapshotBuilderFactory};

// Shadowing
pub use shadow_store::ShadowPolicy;

// Stats
pub use stats::{stats_reply, ProxyStats};

// Writers
pub use writer::{AsyncWriter, WriteEntry, WriterSink};

// Timers
pub use timer::{on_request_timer, NamedTimer};

// Re-export the message model for convenience
pub use memrouter_common::msg::{McReply, McRequest, Op, ReplyResult};
