//! Live shadowing policy
//!
//! Wraps a validated [`ShadowData`] behind a versioned pointer and keeps it
//! current against runtime-variable pushes. Readers load one consistent
//! snapshot; an update replaces the pointer wholesale or not at all, so a
//! torn mix of old and new bounds is impossible. An invalid pushed value
//! rejects the whole update and keeps the previous data.

use arc_swap::ArcSwap;
use memrouter_common::RouterResult;
use memrouter_config::runtime_vars::{RuntimeVarsData, RuntimeVarsPublisher, SubscriptionHandle};
use memrouter_config::shadow::{parse_index_range, parse_key_fraction_range, ShadowData};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// A shadowing policy with live runtime-variable updates.
pub struct ShadowPolicy {
    // Declared before `data`: the subscription must unregister before the
    // storage it updates goes away.
    subscription: Option<SubscriptionHandle>,
    data: Arc<ArcSwap<ShadowData>>,
}

impl ShadowPolicy {
    /// Build a policy from its JSON form, optionally binding it to runtime
    /// variables for live updates.
    pub fn from_json(json: &Value, vars: Option<&RuntimeVarsPublisher>) -> RouterResult<Self> {
        Ok(Self::from_data(ShadowData::from_json(json)?, vars))
    }

    /// Build a policy from already-validated data.
    pub fn from_data(data: ShadowData, vars: Option<&RuntimeVarsPublisher>) -> Self {
        let data = Arc::new(ArcSwap::from_pointee(data));
        let subscription = vars.map(|vars| {
            let slot = data.clone();
            vars.subscribe_and_call(Box::new(move |_old, new| {
                apply_update(&slot, new);
            }))
        });
        Self { subscription, data }
    }

    /// The current policy data.
    pub fn data(&self) -> Arc<ShadowData> {
        self.data.load_full()
    }

    /// Whether this policy listens for runtime-variable updates.
    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }
}

/// Stage, validate, and commit one runtime-variables push into the policy.
fn apply_update(slot: &ArcSwap<ShadowData>, new_vars: &RuntimeVarsData) {
    let mut copy = ShadowData::clone(&slot.load());

    let mut staged_index = None;
    if let Some(name) = &copy.index_range_var {
        if let Some(value) = new_vars.variable(name) {
            match parse_index_range(value) {
                Ok(range) => staged_index = Some(range),
                Err(e) => {
                    warn!(var = %name, error = %e, "rejecting shadow index range update");
                    return;
                }
            }
        }
    }

    let mut staged_fraction = None;
    if let Some(name) = &copy.key_fraction_range_var {
        if let Some(value) = new_vars.variable(name) {
            match parse_key_fraction_range(value) {
                Ok(range) => staged_fraction = Some(range),
                Err(e) => {
                    warn!(var = %name, error = %e, "rejecting shadow key fraction update");
                    return;
                }
            }
        }
    }

    if let Some((start, end)) = staged_index {
        copy.start_index = start;
        copy.end_index = end;
    }
    if let Some((start, end)) = staged_fraction {
        copy.start_key_fraction = start;
        copy.end_key_fraction = end;
    }
    slot.store(Arc::new(copy));
}
