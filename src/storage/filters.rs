//! Persisted UI-filter map.
//!
//! Saved list filters are the one piece of UI state the session layer owns,
//! because logout must wipe them: on a shared device the next login must not
//! inherit the previous user's saved filters. Stored as a single JSON object
//! under one key, like the session registry.

use super::keys::FILTERS_KEY;
use super::kv::KeyValueStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct FilterStore {
    kv: Arc<KeyValueStore>,
}

impl FilterStore {
    #[must_use]
    pub fn new(kv: Arc<KeyValueStore>) -> Self {
        Self { kv }
    }

    fn load(&self) -> Map<String, Value> {
        let Some(raw) = self.kv.get(FILTERS_KEY) else {
            return Map::new();
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                debug!("discarding malformed filter map: {e}");
                self.kv.remove(FILTERS_KEY);
                Map::new()
            }
        }
    }

    fn save(&self, filters: &Map<String, Value>) {
        match serde_json::to_string(filters) {
            Ok(raw) => self.kv.set(FILTERS_KEY, &raw),
            Err(e) => debug!("failed to serialize filter map: {e}"),
        }
    }

    pub fn set(&self, name: &str, value: Value) {
        let mut filters = self.load();
        filters.insert(name.to_string(), value);
        self.save(&filters);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.load().get(name).cloned()
    }

    pub fn remove(&self, name: &str) {
        let mut filters = self.load();
        if filters.remove(name).is_some() {
            self.save(&filters);
        }
    }

    /// The logout privacy sweep: every saved filter goes at once.
    pub fn clear_all(&self) {
        self.kv.remove(FILTERS_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;
    use serde_json::json;

    fn store() -> FilterStore {
        FilterStore::new(Arc::new(KeyValueStore::new(Arc::new(MemoryBackend::new()))))
    }

    #[test]
    fn filters_round_trip_and_clear_together() {
        let filters = store();
        filters.set("orders", json!({"status": "open"}));
        filters.set("albums", json!({"year": 2026}));

        assert_eq!(filters.get("orders"), Some(json!({"status": "open"})));

        filters.clear_all();
        assert!(filters.get("orders").is_none());
        assert!(filters.get("albums").is_none());
    }

    #[test]
    fn malformed_map_is_discarded() {
        let kv = Arc::new(KeyValueStore::new(Arc::new(MemoryBackend::new())));
        kv.set(FILTERS_KEY, "[1,2");
        let filters = FilterStore::new(Arc::clone(&kv));
        assert!(filters.get("anything").is_none());
        assert!(kv.get(FILTERS_KEY).is_none());
    }
}
