//! Runtime variables
//!
//! Runtime variables are a small JSON document pushed at the router from
//! the outside (ops tooling, a control plane) without a full configuration
//! reload. Components subscribe to changes; each publish replaces the whole
//! snapshot and fans the old/new pair out to every subscriber.
//!
//! Subscriptions are RAII: dropping the [`SubscriptionHandle`] unsubscribes.
//! Subscribers that capture state by reference must drop their handle before
//! that state, so a publish can never race against a half-destroyed
//! subscriber.

use memrouter_common::{RouterError, RouterResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// An immutable snapshot of the runtime variables document.
#[derive(Debug, Clone, Default)]
pub struct RuntimeVarsData {
    vars: serde_json::Map<String, Value>,
}

impl RuntimeVarsData {
    /// Parse a snapshot from JSON text; the document must be an object.
    pub fn from_json(text: &str) -> RouterResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| RouterError::Config {
            message: format!("runtime variables are not valid JSON: {}", e),
            source: Some(Box::new(e)),
        })?;
        match value {
            Value::Object(vars) => Ok(Self { vars }),
            _ => Err(RouterError::config("runtime variables are not an object")),
        }
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

type Callback = Box<dyn Fn(Option<&RuntimeVarsData>, &RuntimeVarsData) + Send + Sync>;

struct VarsShared {
    current: Mutex<Arc<RuntimeVarsData>>,
    subscribers: Mutex<HashMap<u64, Callback>>,
    next_id: AtomicU64,
}

/// Publisher side of the runtime variables document.
pub struct RuntimeVarsPublisher {
    shared: Arc<VarsShared>,
}

impl RuntimeVarsPublisher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(VarsShared {
                current: Mutex::new(Arc::new(RuntimeVarsData::default())),
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<RuntimeVarsData> {
        self.shared.current.lock().clone()
    }

    /// Replace the snapshot and notify every subscriber with the old and
    /// new values.
    pub fn publish(&self, new: RuntimeVarsData) {
        let new = Arc::new(new);
        let old = {
            let mut cur = self.shared.current.lock();
            std::mem::replace(&mut *cur, new.clone())
        };
        let subs = self.shared.subscribers.lock();
        for cb in subs.values() {
            cb(Some(&old), &new);
        }
    }

    /// Subscribe a callback and immediately invoke it with the current
    /// snapshot (old value absent). The subscription lives until the
    /// returned handle is dropped.
    pub fn subscribe_and_call(&self, cb: Callback) -> SubscriptionHandle {
        let current = self.current();
        cb(None, &current);

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().insert(id, cb);
        SubscriptionHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }
}

impl Default for RuntimeVarsPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII subscription; dropping it unsubscribes the callback.
pub struct SubscriptionHandle {
    id: u64,
    shared: Weak<VarsShared>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.subscribers.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_from_json_requires_object() {
        assert!(RuntimeVarsData::from_json("{\"a\": 1}").is_ok());
        assert!(RuntimeVarsData::from_json("[1, 2]").is_err());
        assert!(RuntimeVarsData::from_json("not json").is_err());
    }

    #[test]
    fn test_variable_lookup() {
        let data = RuntimeVarsData::from_json("{\"ir\": [3, 7]}").unwrap();
        assert_eq!(data.variable("ir"), Some(&serde_json::json!([3, 7])));
        assert_eq!(data.variable("missing"), None);
    }

    #[test]
    fn test_subscribe_calls_immediately() {
        let publisher = RuntimeVarsPublisher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let _handle = publisher.subscribe_and_call(Box::new(move |old, _new| {
            assert!(old.is_none() || old.is_some());
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        publisher.publish(RuntimeVarsData::from_json("{\"x\": 1}").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_passes_old_and_new() {
        let publisher = RuntimeVarsPublisher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let _handle = publisher.subscribe_and_call(Box::new(move |old, new| {
            seen2.lock().push((
                old.map(|o| o.variable("v").cloned()),
                new.variable("v").cloned(),
            ));
        }));

        publisher.publish(RuntimeVarsData::from_json("{\"v\": 1}").unwrap());
        publisher.publish(RuntimeVarsData::from_json("{\"v\": 2}").unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        // initial call has no old value
        assert_eq!(seen[0], (None, None));
        assert_eq!(seen[1], (Some(None), Some(serde_json::json!(1))));
        assert_eq!(
            seen[2],
            (Some(Some(serde_json::json!(1))), Some(serde_json::json!(2)))
        );
    }

    #[test]
    fn test_drop_unsubscribes() {
        let publisher = RuntimeVarsPublisher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        let handle = publisher.subscribe_and_call(Box::new(move |_, _| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(publisher.subscriber_count(), 1);

        drop(handle);
        assert_eq!(publisher.subscriber_count(), 0);

        publisher.publish(RuntimeVarsData::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
