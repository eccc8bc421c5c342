//! Never-failing key/value layer over a [`StorageBackend`].
//!
//! Some platform stores fail silently or loudly at the worst moments
//! (quota exhaustion, private-browsing restrictions, read-only home
//! directories). This layer absorbs all of that: it probes the backend once
//! at construction, keeps an in-memory shadow of every write, and falls back
//! to the shadow whenever the backend misbehaves. Every write still attempts
//! the real backend first, so one full key does not take healthy keys down
//! with it. Callers get a total function over keys and values; nothing here
//! ever returns an error.

use super::backend::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const PROBE_KEY: &str = "__tablo_storage_probe__";

pub struct KeyValueStore {
    backend: Arc<dyn StorageBackend>,
    shadow: Mutex<HashMap<String, String>>,
    degraded: AtomicBool,
}

impl KeyValueStore {
    /// Probes the backend with a throwaway write/remove. A failing probe
    /// marks the store degraded immediately — with the warning logged once,
    /// up front — rather than waiting for the first real write to fail.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let store = Self {
            backend,
            shadow: Mutex::new(HashMap::new()),
            degraded: AtomicBool::new(false),
        };

        let probe = store
            .backend
            .set(PROBE_KEY, "probe")
            .and_then(|()| store.backend.remove(PROBE_KEY));
        if let Err(e) = probe {
            store.mark_degraded(&e.to_string());
        }

        store
    }

    /// Whether the backend has failed at least once and the shadow is
    /// (partially) carrying the data.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn mark_degraded(&self, cause: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!("storage backend degraded, falling back to in-memory shadow: {cause}");
        } else {
            debug!("storage backend still degraded: {cause}");
        }
    }

    /// Always attempts the real backend and always records the value in the
    /// shadow, so a later `get` succeeds whether or not the backend took the
    /// write.
    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set(key, value) {
            self.mark_degraded(&e.to_string());
        }
        self.shadow.lock().insert(key.to_string(), value.to_string());
    }

    /// Prefers the backend; falls back to the shadow on a miss or a failure.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => debug!("storage read failed for {key}: {e}"),
        }
        self.shadow.lock().get(key).cloned()
    }

    /// Removes from both tiers. Backend failures are ignored; the shadow is
    /// always cleared so the key reads as absent afterwards.
    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            debug!("storage remove failed for {key}: {e}");
        }
        self.shadow.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{BackendError, MemoryBackend};

    /// Fails every operation, like a storage quota that is already full.
    struct DeadBackend;

    impl StorageBackend for DeadBackend {
        fn set(&self, _: &str, _: &str) -> Result<(), BackendError> {
            Err(BackendError::Rejected("quota exceeded".into()))
        }
        fn get(&self, _: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::Rejected("quota exceeded".into()))
        }
        fn remove(&self, _: &str) -> Result<(), BackendError> {
            Err(BackendError::Rejected("quota exceeded".into()))
        }
    }

    /// Healthy until `fail_after` writes have happened, then rejects writes
    /// while reads keep working.
    struct FlakyBackend {
        inner: MemoryBackend,
        writes: std::sync::atomic::AtomicUsize,
        fail_after: usize,
    }

    impl FlakyBackend {
        fn new(fail_after: usize) -> Self {
            Self {
                inner: MemoryBackend::new(),
                writes: std::sync::atomic::AtomicUsize::new(0),
                fail_after,
            }
        }
    }

    impl StorageBackend for FlakyBackend {
        fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err(BackendError::Rejected("quota exceeded".into()));
            }
            self.inner.set(key, value)
        }
        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key)
        }
        fn remove(&self, key: &str) -> Result<(), BackendError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn healthy_backend_round_trips() {
        let store = KeyValueStore::new(Arc::new(MemoryBackend::new()));
        store.set("a", "1");
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert!(!store.is_degraded());
        store.remove("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn failing_set_still_serves_the_value_from_the_shadow() {
        // The probe takes the only healthy write; the first real one fails.
        let store = KeyValueStore::new(Arc::new(FlakyBackend::new(1)));
        store.set("token", "abc");
        assert_eq!(store.get("token"), Some("abc".to_string()));
        assert!(store.is_degraded());
    }

    #[test]
    fn degradation_is_per_key_not_per_store() {
        // Probe + one real write succeed, everything after fails.
        let store = KeyValueStore::new(Arc::new(FlakyBackend::new(2)));
        store.set("healthy", "1");
        store.set("quota-victim", "2");

        // Both keys read back, one from the backend, one from the shadow.
        assert_eq!(store.get("healthy"), Some("1".to_string()));
        assert_eq!(store.get("quota-victim"), Some("2".to_string()));
        assert!(store.is_degraded());
    }

    #[test]
    fn dead_backend_is_detected_at_construction() {
        let store = KeyValueStore::new(Arc::new(DeadBackend));
        assert!(store.is_degraded());
        store.set("k", "v");
        assert_eq!(store.get("k"), Some("v".to_string()));
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn unwritable_file_backend_degrades_to_the_shadow() {
        use crate::storage::backend::FileBackend;

        let dir = tempfile::tempdir().unwrap();
        // The parent "directory" is a plain file, so every write fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let store = KeyValueStore::new(Arc::new(FileBackend::new(blocker.join("store.json"))));
        assert!(store.is_degraded());
        store.set("token", "abc");
        assert_eq!(store.get("token"), Some("abc".to_string()));
    }

    #[test]
    fn backend_wins_over_stale_shadow() {
        let backend = Arc::new(MemoryBackend::new());
        let store = KeyValueStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
        store.set("k", "old");
        // Another writer (a second tab) updates the shared backend directly.
        backend.set("k", "new").unwrap();
        assert_eq!(store.get("k"), Some("new".to_string()));
    }

    #[test]
    fn remove_clears_shadow_even_when_backend_fails() {
        let store = KeyValueStore::new(Arc::new(FlakyBackend::new(1)));
        store.set("k", "v");
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }
}
