//! Key-value store behind the `set`/`get`/`del` methods.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Storage injected into the handler.
pub trait KvStore: Send + Sync {
    /// Stores `value`, returning the previous one.
    fn set(&self, key: &str, value: Value) -> Option<Value>;

    fn get(&self, key: &str) -> Option<Value>;

    /// Removes `key`, returning whether it existed.
    fn del(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn set(&self, key: &str, value: Value) -> Option<Value> {
        self.entries.write().insert(key.to_string(), value)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn del(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.set("k", json!(1)), None);
        assert_eq!(store.set("k", json!(2)), Some(json!(1)));
        assert_eq!(store.get("k"), Some(json!(2)));
        assert!(store.del("k"));
        assert!(!store.del("k"));
        assert_eq!(store.get("k"), None);
    }
}
