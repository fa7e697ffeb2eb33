//! Routing prefix parsing
//!
//! A routing prefix names the region and cluster a worker routes into, in
//! the form `/region/cluster/`. The trailing slash is normalized in; both
//! path segments must be non-empty.

use memrouter_common::{RouterError, RouterResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^/[^/]+/[^/]+/?$").unwrap());

/// A validated `/region/cluster/` routing prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingPrefix {
    full: String,
    region: String,
    cluster: String,
}

impl RoutingPrefix {
    /// Parse and validate a routing prefix string.
    pub fn parse(s: &str) -> RouterResult<Self> {
        if !PREFIX_RE.is_match(s) {
            return Err(RouterError::config(format!(
                "routing prefix ({}) should be of the form /region/cluster/",
                s
            )));
        }

        let mut full = s.to_string();
        if !full.ends_with('/') {
            full.push('/');
        }

        let mut segments = full[1..].splitn(3, '/');
        let region = segments.next().unwrap_or_default().to_string();
        let cluster = segments.next().unwrap_or_default().to_string();

        Ok(Self {
            full,
            region,
            cluster,
        })
    }

    /// The normalized prefix, always with leading and trailing slash.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }
}

impl FromStr for RoutingPrefix {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RoutingPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

/// Extract the region from a `/region/cluster/` style prefix.
///
/// Returns `None` when the prefix is malformed. Unlike [`RoutingPrefix::parse`]
/// this accepts any string with at least one well-delimited leading segment,
/// for callers that only need the region of an arbitrary routing prefix.
pub fn region_from_prefix(prefix: &str) -> Option<&str> {
    if !prefix.starts_with('/') {
        return None;
    }
    let rest = &prefix[1..];
    let end = rest.find('/')?;
    Some(&rest[..end])
}
