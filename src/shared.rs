//! Process-wide mutable state shared by workers and handlers.
//!
//! A single mutex guards a JSON map. Read-modify-write sequences go through
//! [`SharedData::update`], which holds the lock for the whole closure.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Key of the bot's own `nick!user@host` address, learned from `WHO`.
pub const ADDRESS: &str = "address";
/// Key of the unix time of the last `PONG` received.
pub const PONGED: &str = "ponged";

#[derive(Clone, Default)]
pub struct SharedData {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    /// Run `f` with exclusive access to the whole map.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Own address, once known.
    pub fn address(&self) -> Option<String> {
        self.get(ADDRESS)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Unix time of the last pong, or 0 if none has arrived.
    pub fn ponged(&self) -> f64 {
        self.get(PONGED).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    /// Forget everything learned from the current connection.
    pub fn reset_connection(&self) {
        self.remove(ADDRESS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_read_typed_values() {
        let data = SharedData::new();
        assert_eq!(data.address(), None);
        assert_eq!(data.ponged(), 0.0);

        data.set(ADDRESS, json!("bot!bot@host"));
        data.set(PONGED, json!(12.5));
        assert_eq!(data.address().as_deref(), Some("bot!bot@host"));
        assert_eq!(data.ponged(), 12.5);

        data.reset_connection();
        assert_eq!(data.address(), None);
        assert_eq!(data.ponged(), 12.5);
    }

    #[test]
    fn update_is_atomic_across_threads() {
        let data = SharedData::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        data.update(|map| {
                            let n = map.get("n").and_then(Value::as_u64).unwrap_or(0);
                            map.insert("n".into(), json!(n + 1));
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(data.get("n"), Some(json!(800)));
    }
}
