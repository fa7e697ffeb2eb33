//! Shadowing policy data
//!
//! A shadowing policy selects a slice of live traffic to duplicate onto a
//! secondary pool: destinations by index range, keys by a fraction of the
//! hash space. Either range may additionally be bound to a named runtime
//! variable so operators can widen or narrow the slice without a config
//! push.
//!
//! This module holds the validated policy data and its JSON parsing; the
//! live-update subscription lives with the proxy engine.

use memrouter_common::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How shadowed traffic is issued to the shadow pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowType {
    /// Fire-and-forget duplication.
    #[default]
    Default,
}

/// Validated shadowing policy parameters.
///
/// Published as a whole: readers always observe one consistent value, never
/// a partially updated one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadowData {
    /// First destination index included in shadowing.
    pub start_index: u64,
    /// Last destination index included in shadowing.
    pub end_index: u64,
    /// Lower bound of the shadowed key-hash fraction, in `[0, 1]`.
    pub start_key_fraction: f64,
    /// Upper bound of the shadowed key-hash fraction, in `[0, 1]`.
    pub end_key_fraction: f64,
    /// Name of the pool shadowed traffic is sent to.
    pub shadow_pool: Option<String>,
    pub shadow_type: ShadowType,
    /// Compare shadow replies against primary replies.
    pub validate_replies: bool,
    /// Runtime variable bound to the index range, if any.
    pub index_range_var: Option<String>,
    /// Runtime variable bound to the key-fraction range, if any.
    pub key_fraction_range_var: Option<String>,
}

impl ShadowData {
    /// Parse and validate a policy from its JSON object form.
    ///
    /// Accepted keys: `index_range` (two non-negative integers, start <=
    /// end), `key_fraction_range` (two numbers in `[0, 1]`, start <= end),
    /// `index_range_rv` and `key_fraction_range_rv` (runtime variable
    /// names). Any violation is fatal for the policy.
    pub fn from_json(json: &Value) -> RouterResult<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| RouterError::policy("policy is not an object"))?;

        let mut data = ShadowData::default();

        if let Some(range) = obj.get("index_range") {
            let (start, end) = parse_index_range(range)?;
            data.start_index = start;
            data.end_index = end;
        }

        if let Some(range) = obj.get("key_fraction_range") {
            let (start, end) = parse_key_fraction_range(range)?;
            data.start_key_fraction = start;
            data.end_key_fraction = end;
        }

        if let Some(name) = obj.get("index_range_rv") {
            data.index_range_var = Some(
                name.as_str()
                    .ok_or_else(|| RouterError::policy("index_range_rv is not a string"))?
                    .to_string(),
            );
        }

        if let Some(name) = obj.get("key_fraction_range_rv") {
            data.key_fraction_range_var = Some(
                name.as_str()
                    .ok_or_else(|| RouterError::policy("key_fraction_range_rv is not a string"))?
                    .to_string(),
            );
        }

        Ok(data)
    }

    /// Whether a destination index falls inside the shadowed range.
    pub fn index_in_range(&self, index: u64) -> bool {
        index >= self.start_index && index <= self.end_index
    }

    /// Whether a key-hash fraction falls inside the shadowed range.
    pub fn key_fraction_in_range(&self, fraction: f64) -> bool {
        fraction >= self.start_key_fraction && fraction <= self.end_key_fraction
    }
}

/// Validate an `index_range` style value: two non-negative integers with
/// start <= end.
pub fn parse_index_range(value: &Value) -> RouterResult<(u64, u64)> {
    let arr = value
        .as_array()
        .ok_or_else(|| RouterError::policy("index_range is not an array"))?;
    if arr.len() != 2 {
        return Err(RouterError::policy("index_range size is not 2"));
    }
    let start = arr[0]
        .as_u64()
        .ok_or_else(|| RouterError::policy("start_index is not a non-negative integer"))?;
    let end = arr[1]
        .as_u64()
        .ok_or_else(|| RouterError::policy("end_index is not a non-negative integer"))?;
    if start > end {
        return Err(RouterError::policy("index_range start > end"));
    }
    Ok((start, end))
}

/// Validate a `key_fraction_range` style value: two numbers in `[0, 1]`
/// with start <= end.
pub fn parse_key_fraction_range(value: &Value) -> RouterResult<(f64, f64)> {
    let arr = value
        .as_array()
        .ok_or_else(|| RouterError::policy("key_fraction_range is not an array"))?;
    if arr.len() != 2 {
        return Err(RouterError::policy("key_fraction_range size is not 2"));
    }
    let start = arr[0]
        .as_f64()
        .ok_or_else(|| RouterError::policy("start_key_fraction is not a number"))?;
    let end = arr[1]
        .as_f64()
        .ok_or_else(|| RouterError::policy("end_key_fraction is not a number"))?;
    if !(0.0..=1.0).contains(&start) || !(0.0..=1.0).contains(&end) || start > end {
        return Err(RouterError::policy("invalid key_fraction_range"));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_policy_defaults() {
        let data = ShadowData::from_json(&json!({})).unwrap();
        assert_eq!(data.start_index, 0);
        assert_eq!(data.end_index, 0);
        assert_eq!(data.start_key_fraction, 0.0);
        assert_eq!(data.end_key_fraction, 0.0);
        assert!(data.index_range_var.is_none());
    }

    #[test]
    fn test_full_policy() {
        let data = ShadowData::from_json(&json!({
            "index_range": [2, 10],
            "key_fraction_range": [0.25, 0.75],
            "index_range_rv": "ir",
            "key_fraction_range_rv": "kfr",
        }))
        .unwrap();
        assert_eq!(data.start_index, 2);
        assert_eq!(data.end_index, 10);
        assert_eq!(data.start_key_fraction, 0.25);
        assert_eq!(data.end_key_fraction, 0.75);
        assert_eq!(data.index_range_var.as_deref(), Some("ir"));
        assert_eq!(data.key_fraction_range_var.as_deref(), Some("kfr"));
    }

    #[test]
    fn test_policy_must_be_object() {
        assert!(ShadowData::from_json(&json!([1, 2])).is_err());
        assert!(ShadowData::from_json(&json!("policy")).is_err());
    }

    #[test]
    fn test_index_range_validation() {
        assert!(ShadowData::from_json(&json!({"index_range": [1]})).is_err());
        assert!(ShadowData::from_json(&json!({"index_range": [5, 2]})).is_err());
        assert!(ShadowData::from_json(&json!({"index_range": [-1, 2]})).is_err());
        assert!(ShadowData::from_json(&json!({"index_range": ["a", "b"]})).is_err());
        assert!(ShadowData::from_json(&json!({"index_range": 3})).is_err());
    }

    #[test]
    fn test_key_fraction_range_validation() {
        assert!(ShadowData::from_json(&json!({"key_fraction_range": [0.5]})).is_err());
        assert!(ShadowData::from_json(&json!({"key_fraction_range": [0.8, 0.2]})).is_err());
        assert!(ShadowData::from_json(&json!({"key_fraction_range": [0.0, 1.5]})).is_err());
        assert!(ShadowData::from_json(&json!({"key_fraction_range": [-0.1, 0.5]})).is_err());
    }

    #[test]
    fn test_rv_names_must_be_strings() {
        assert!(ShadowData::from_json(&json!({"index_range_rv": 7})).is_err());
        assert!(ShadowData::from_json(&json!({"key_fraction_range_rv": []})).is_err());
    }

    #[test]
    fn test_range_membership() {
        let data = ShadowData::from_json(&json!({
            "index_range": [3, 7],
            "key_fraction_range": [0.0, 0.5],
        }))
        .unwrap();
        assert!(data.index_in_range(3));
        assert!(data.index_in_range(7));
        assert!(!data.index_in_range(8));
        assert!(data.key_fraction_in_range(0.5));
        assert!(!data.key_fraction_in_range(0.51));
    }
}
