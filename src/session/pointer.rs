//! Which session is "current" in this tab.
//!
//! Session type must be tab-local (two tabs, two guests) but also has to
//! survive a full reload, and no single storage tier gives both. So the
//! pointer is written to two tiers: a tab-scoped store that is authoritative
//! while present, and a durable store that exists purely so a reloaded tab
//! can recover its identity. A tab-scoped pointer is only honored when a
//! live credential actually backs it; a stale one silently falls through to
//! the durable tier rather than surfacing an error.

use crate::session::types::SessionKey;
use crate::storage::credentials::CredentialStore;
use crate::storage::keys::ACTIVE_SESSION_KEY;
use crate::storage::kv::KeyValueStore;
use std::sync::Arc;
use tracing::debug;

pub struct ActiveSessionPointer {
    tab: Arc<KeyValueStore>,
    durable: Arc<KeyValueStore>,
    credentials: CredentialStore,
}

impl ActiveSessionPointer {
    #[must_use]
    pub fn new(
        tab: Arc<KeyValueStore>,
        durable: Arc<KeyValueStore>,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            tab,
            durable,
            credentials,
        }
    }

    /// Resolves the active session for this tab.
    ///
    /// 1. The tab-scoped pointer wins if a live credential backs it.
    /// 2. Otherwise the durable pointer is returned as-is; it exists to
    ///    survive reloads, and the caller validates credentials downstream.
    /// 3. Otherwise there is no active session.
    #[must_use]
    pub fn get(&self) -> Option<SessionKey> {
        if let Some(raw) = self.tab.get(ACTIVE_SESSION_KEY) {
            if let Some(key) = SessionKey::parse(&raw) {
                if self.credentials.has_live_credential(key) {
                    return Some(key);
                }
                debug!("tab-scoped pointer {key} has no live credential, falling back");
            }
        }

        self.durable
            .get(ACTIVE_SESSION_KEY)
            .and_then(|raw| SessionKey::parse(&raw))
    }

    /// Writes both tiers: the durable copy is what lets a reloaded tab
    /// recover, the tab copy is what keeps tabs from contaminating each
    /// other.
    pub fn set(&self, key: SessionKey) {
        let value = key.to_string();
        self.tab.set(ACTIVE_SESSION_KEY, &value);
        self.durable.set(ACTIVE_SESSION_KEY, &value);
    }

    /// Removes only the tab-scoped pointer. Other tabs may still be relying
    /// on the durable copy until they write their own tab pointer.
    pub fn clear(&self) {
        self.tab.remove(ACTIVE_SESSION_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionType;
    use crate::storage::backend::{MemoryBackend, StorageBackend};
    use secrecy::SecretString;

    struct Fixture {
        pointer: ActiveSessionPointer,
        credentials: CredentialStore,
        durable: Arc<KeyValueStore>,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(MemoryBackend::new()))
    }

    fn fixture_on(durable_backend: Arc<dyn StorageBackend>) -> Fixture {
        let durable = Arc::new(KeyValueStore::new(durable_backend));
        let tab = Arc::new(KeyValueStore::new(Arc::new(MemoryBackend::new())));
        let credentials = CredentialStore::new(Arc::clone(&durable));
        Fixture {
            pointer: ActiveSessionPointer::new(tab, Arc::clone(&durable), credentials.clone()),
            credentials,
            durable,
        }
    }

    #[test]
    fn set_writes_both_tiers_and_clear_removes_only_the_tab_tier() {
        let f = fixture();
        let key = SessionKey::new(7, SessionType::Code);
        f.credentials.set_auth_token(key, &SecretString::from("abc".to_string()));

        f.pointer.set(key);
        assert_eq!(f.pointer.get(), Some(key));
        assert_eq!(
            f.durable.get(ACTIVE_SESSION_KEY).as_deref(),
            Some("7:code")
        );

        f.pointer.clear();
        // Tab tier gone, durable fallback still resolves.
        assert_eq!(f.pointer.get(), Some(key));
        assert_eq!(
            f.durable.get(ACTIVE_SESSION_KEY).as_deref(),
            Some("7:code")
        );
    }

    #[test]
    fn dead_tab_pointer_falls_through_to_the_durable_pointer() {
        let f = fixture();
        let live = SessionKey::new(7, SessionType::Code);
        let dead = SessionKey::new(9, SessionType::Code);

        f.credentials.set_auth_token(live, &SecretString::from("abc".to_string()));
        f.pointer.set(live);
        // Another flow wrote a tab pointer whose credential has since been
        // cleared; resolution must not return the dead key.
        f.pointer.set(dead);
        f.durable.set(ACTIVE_SESSION_KEY, &live.to_string());

        assert_eq!(f.pointer.get(), Some(live));
    }

    #[test]
    fn share_pointer_is_live_on_guest_token_alone() {
        let f = fixture();
        let key = SessionKey::new(7, SessionType::Share);
        f.credentials.set_guest_token(key, &SecretString::from("g1".to_string()));

        f.pointer.set(key);
        assert_eq!(f.pointer.get(), Some(key));
    }

    #[test]
    fn absent_everywhere_resolves_to_none() {
        let f = fixture();
        assert_eq!(f.pointer.get(), None);
    }

    #[test]
    fn two_tabs_hold_independent_active_sessions() {
        // One shared durable backend, one tab store per tab.
        let shared: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let tab_a = fixture_on(Arc::clone(&shared));
        let tab_b = fixture_on(Arc::clone(&shared));

        let code = SessionKey::new(7, SessionType::Code);
        let share = SessionKey::new(9, SessionType::Share);
        tab_a
            .credentials
            .set_auth_token(code, &SecretString::from("abc".to_string()));
        tab_b
            .credentials
            .set_guest_token(share, &SecretString::from("g1".to_string()));

        tab_a.pointer.set(code);
        tab_b.pointer.set(share);

        assert_eq!(tab_a.pointer.get(), Some(code));
        assert_eq!(tab_b.pointer.get(), Some(share));
    }
}
