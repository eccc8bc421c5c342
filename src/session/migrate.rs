//! One-shot upgrade from the flat single-session key scheme.
//!
//! Before credential isolation there was exactly one session per device,
//! stored under flat `tablo_*` keys. On startup, before anything else reads
//! state, those keys are rewritten into the per-key scheme and deleted. The
//! legacy scheme only ever issued contact logins, so the migrated session is
//! always `code`. A project blob that no longer parses is discarded together
//! with the rest of the legacy keys rather than migrated half-broken.

use crate::session::types::{ProjectSnapshot, SessionKey, SessionType};
use crate::storage::credentials::CredentialStore;
use crate::storage::keys::{
    LEGACY_AUTH_TOKEN_KEY, LEGACY_CAN_FINALIZE_KEY, LEGACY_PROJECT_KEY, LEGACY_TOKEN_TYPE_KEY,
};
use crate::storage::kv::KeyValueStore;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

pub struct LegacyMigrator {
    kv: Arc<KeyValueStore>,
    credentials: CredentialStore,
}

impl LegacyMigrator {
    #[must_use]
    pub fn new(kv: Arc<KeyValueStore>, credentials: CredentialStore) -> Self {
        Self { kv, credentials }
    }

    /// Runs the migration, returning the migrated session key if one was
    /// produced. Calling again is a no-op: the legacy keys are gone after
    /// the first run.
    pub fn run(&self) -> Option<SessionKey> {
        let token = self.kv.get(LEGACY_AUTH_TOKEN_KEY)?;
        let raw_project = self.kv.get(LEGACY_PROJECT_KEY)?;

        let project: ProjectSnapshot = match serde_json::from_str(&raw_project) {
            Ok(project) => project,
            Err(e) => {
                debug!("legacy project blob unreadable, discarding legacy keys: {e}");
                self.delete_legacy_keys();
                return None;
            }
        };

        let key = SessionKey::new(project.id, SessionType::Code);

        self.credentials
            .set_auth_token(key, &SecretString::from(token));
        self.credentials.set_project(key, &project);
        if let Some(raw) = self.kv.get(LEGACY_CAN_FINALIZE_KEY) {
            self.credentials.set_can_finalize(key, raw == "true");
        }

        self.delete_legacy_keys();
        info!("migrated legacy session into {key}");

        Some(key)
    }

    fn delete_legacy_keys(&self) {
        self.kv.remove(LEGACY_AUTH_TOKEN_KEY);
        self.kv.remove(LEGACY_PROJECT_KEY);
        self.kv.remove(LEGACY_TOKEN_TYPE_KEY);
        self.kv.remove(LEGACY_CAN_FINALIZE_KEY);
    }
}
