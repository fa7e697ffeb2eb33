//! Parsed memcached message model
//!
//! The proxy core never touches wire bytes: a codec in front of it parses
//! the memcached protocol and hands over `McRequest` values, and receives
//! `McReply` values to serialize back. This module defines that exchange
//! currency plus the operational validation the core applies on intake.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum key length accepted by memcached servers.
pub const MAX_KEY_LENGTH: usize = 250;

// ============================================================================
// Operations
// ============================================================================

/// Memcached operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Get,
    Gets,
    Metaget,
    Add,
    Replace,
    Set,
    Append,
    Prepend,
    Cas,
    Incr,
    Decr,
    Delete,
    Touch,
    LeaseGet,
    LeaseSet,
    FlushAll,
    Stats,
    Version,
    /// Internal introspection op; answered by the config's service-info
    /// handler rather than an upstream.
    GetServiceInfo,
}

impl Op {
    /// Canonical lowercase name, as it appears in stats output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::Gets => "gets",
            Op::Metaget => "metaget",
            Op::Add => "add",
            Op::Replace => "replace",
            Op::Set => "set",
            Op::Append => "append",
            Op::Prepend => "prepend",
            Op::Cas => "cas",
            Op::Incr => "incr",
            Op::Decr => "decr",
            Op::Delete => "delete",
            Op::Touch => "touch",
            Op::LeaseGet => "lease_get",
            Op::LeaseSet => "lease_set",
            Op::FlushAll => "flush_all",
            Op::Stats => "stats",
            Op::Version => "version",
            Op::GetServiceInfo => "get_service_info",
        }
    }

    /// Whether this operation addresses a specific key.
    pub fn is_keyed(&self) -> bool {
        !matches!(self, Op::Stats | Op::Version | Op::FlushAll)
    }

    /// Whether this operation carries a value payload.
    pub fn has_value(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Replace
                | Op::Set
                | Op::Append
                | Op::Prepend
                | Op::Cas
                | Op::LeaseSet
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reply results
// ============================================================================

/// Result code carried by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyResult {
    Ok,
    Stored,
    NotStored,
    Found,
    NotFound,
    Deleted,
    Touched,
    /// Routing failed inside this process (exception, no route, ...).
    LocalError,
    /// The upstream answered with an error.
    RemoteError,
    Timeout,
    ConnectError,
    Busy,
    TryAgain,
}

impl ReplyResult {
    /// Whether this result counts as an error for reply accounting.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ReplyResult::LocalError
                | ReplyResult::RemoteError
                | ReplyResult::Timeout
                | ReplyResult::ConnectError
                | ReplyResult::Busy
                | ReplyResult::TryAgain
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyResult::Ok => "ok",
            ReplyResult::Stored => "stored",
            ReplyResult::NotStored => "not_stored",
            ReplyResult::Found => "found",
            ReplyResult::NotFound => "not_found",
            ReplyResult::Deleted => "deleted",
            ReplyResult::Touched => "touched",
            ReplyResult::LocalError => "local_error",
            ReplyResult::RemoteError => "remote_error",
            ReplyResult::Timeout => "timeout",
            ReplyResult::ConnectError => "connect_error",
            ReplyResult::Busy => "busy",
            ReplyResult::TryAgain => "try_again",
        }
    }
}

impl fmt::Display for ReplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Request
// ============================================================================

/// A parsed memcached request.
#[derive(Debug, Clone)]
pub struct McRequest {
    pub op: Op,
    pub key: Bytes,
    pub value: Option<Bytes>,
    pub flags: u32,
    pub exptime: u32,
}

impl McRequest {
    /// Create a request with the given op and key and no payload.
    pub fn new(op: Op, key: impl Into<Bytes>) -> Self {
        Self {
            op,
            key: key.into(),
            value: None,
            flags: 0,
            exptime: 0,
        }
    }

    /// Attach a value payload.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// The key as a lossy UTF-8 string, for logging and error messages.
    pub fn key_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Operational well-formedness check.
    ///
    /// The codec already validated the wire framing; this verifies that the
    /// request makes sense to route: keyed ops carry a key within the
    /// protocol limit and free of whitespace or control bytes.
    pub fn validate(&self) -> Result<(), String> {
        if self.op.is_keyed() {
            if self.key.is_empty() {
                return Err(format!("{} request without a key", self.op));
            }
            if self.key.len() > MAX_KEY_LENGTH {
                return Err(format!(
                    "key length {} exceeds limit of {}",
                    self.key.len(),
                    MAX_KEY_LENGTH
                ));
            }
            if self.key.iter().any(|b| *b <= b' ' || *b == 0x7f) {
                return Err("key contains whitespace or control bytes".to_string());
            }
        }
        if self.op.has_value() && self.value.is_none() {
            return Err(format!("{} request without a value", self.op));
        }
        Ok(())
    }
}

// ============================================================================
// Reply
// ============================================================================

/// A reply as delivered back to the client callback.
#[derive(Debug, Clone)]
pub struct McReply {
    pub op: Op,
    pub result: ReplyResult,
    pub value: Option<Bytes>,
    pub flags: u32,
}

impl McReply {
    /// A reply carrying only a result code.
    pub fn of(op: Op, result: ReplyResult) -> Self {
        Self {
            op,
            result,
            value: None,
            flags: 0,
        }
    }

    /// A reply carrying a result code and a message/value string.
    pub fn with_message(op: Op, result: ReplyResult, message: impl Into<String>) -> Self {
        Self {
            op,
            result,
            value: Some(Bytes::from(message.into())),
            flags: 0,
        }
    }

    /// A synthetic reply for a routing failure inside this process.
    pub fn local_error(op: Op, message: impl Into<String>) -> Self {
        Self::with_message(op, ReplyResult::LocalError, message)
    }

    /// Attach a value payload.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// The value as a lossy UTF-8 string.
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        self.value
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_default()
    }
}
