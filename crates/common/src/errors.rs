//! Error types for memrouter
//!
//! This module defines the error types shared across the memrouter crates,
//! with a focus on clear failure modes at configuration boundaries. Request
//! level routing failures are not represented here: they are materialized as
//! synthetic replies and never escape the worker loop.

use thiserror::Error;

/// Main error type for memrouter operations
#[derive(Error, Debug)]
pub enum RouterError {
    /// The parsed request failed operational validation
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Configuration errors (bad routing prefix, failed snapshot build, ...)
    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Shadowing policy JSON failed validation
    #[error("shadowing policy: {reason}")]
    PolicyJson { reason: String },

    /// An async writer thread could not be spawned
    #[error("writer startup failed: {name}")]
    WriterStartup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An async writer rejected an entry (queue full or writer stopped)
    #[error("writer queue: {message}")]
    WriterQueue { message: String },

    /// Worker lifecycle misuse (double attach, submit before attach, ...)
    #[error("worker lifecycle: {message}")]
    Lifecycle { message: String },

    /// Upstream destination failure surfaced through a route handle
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl RouterError {
    /// Convenience constructor for configuration errors without a source
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Convenience constructor for policy validation errors
    pub fn policy(reason: impl Into<String>) -> Self {
        Self::PolicyJson {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for lifecycle misuse errors
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }
}

/// Result type alias for memrouter operations
pub type RouterResult<T> = Result<T, RouterError>;
