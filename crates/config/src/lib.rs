//! Configuration surface for memrouter
//!
//! This crate holds the validated configuration types the proxy engine
//! consumes: routing prefixes, pool descriptions, the shadowing policy data
//! model, and the runtime-variables document with its subscription registry.
//!
//! Loading configuration text from files or services, and building full
//! route-handle trees out of it, is the host's job; this crate only
//! validates the shapes.

pub mod pools;
pub mod route_prefix;
pub mod runtime_vars;
pub mod shadow;

pub use pools::{PoolConfig, PoolType};
pub use route_prefix::{region_from_prefix, RoutingPrefix};
pub use runtime_vars::{RuntimeVarsData, RuntimeVarsPublisher, SubscriptionHandle};
pub use shadow::{ShadowData, ShadowType};
