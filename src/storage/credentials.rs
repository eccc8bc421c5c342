//! Typed accessors over the credential record of one session key.
//!
//! Every field lives under its own isolated key (see [`super::keys`]), so
//! writing one session's token can never disturb another session's record.
//! Malformed persisted blobs are deleted and read as absent; the layer never
//! propagates a parse failure upward.

use super::keys::{credential_key, CredentialField};
use super::kv::KeyValueStore;
use crate::guest::VerificationStatus;
use crate::session::types::{ProjectSnapshot, SessionKey, SessionType};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<KeyValueStore>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(kv: Arc<KeyValueStore>) -> Self {
        Self { kv }
    }

    fn read(&self, key: SessionKey, field: CredentialField) -> Option<String> {
        self.kv.get(&credential_key(key, field))
    }

    fn write(&self, key: SessionKey, field: CredentialField, value: &str) {
        self.kv.set(&credential_key(key, field), value);
    }

    fn delete(&self, key: SessionKey, field: CredentialField) {
        self.kv.remove(&credential_key(key, field));
    }

    // --- auth token ---

    #[must_use]
    pub fn auth_token(&self, key: SessionKey) -> Option<SecretString> {
        self.read(key, CredentialField::Token).map(SecretString::from)
    }

    pub fn set_auth_token(&self, key: SessionKey, token: &SecretString) {
        self.write(key, CredentialField::Token, token.expose_secret());
    }

    // --- project snapshot ---

    /// Returns the cached project, deleting the blob if it no longer parses.
    #[must_use]
    pub fn project(&self, key: SessionKey) -> Option<ProjectSnapshot> {
        let raw = self.read(key, CredentialField::Project)?;
        match serde_json::from_str(&raw) {
            Ok(project) => Some(project),
            Err(e) => {
                debug!("discarding malformed project blob for {key}: {e}");
                self.delete(key, CredentialField::Project);
                None
            }
        }
    }

    pub fn set_project(&self, key: SessionKey, project: &ProjectSnapshot) {
        match serde_json::to_string(project) {
            Ok(raw) => self.write(key, CredentialField::Project, &raw),
            Err(e) => debug!("failed to serialize project for {key}: {e}"),
        }
    }

    // --- finalize permission ---

    #[must_use]
    pub fn can_finalize(&self, key: SessionKey) -> bool {
        self.read(key, CredentialField::CanFinalize)
            .is_some_and(|raw| raw == "true")
    }

    pub fn set_can_finalize(&self, key: SessionKey, can_finalize: bool) {
        self.write(
            key,
            CredentialField::CanFinalize,
            if can_finalize { "true" } else { "false" },
        );
    }

    // --- guest sub-identity ---

    #[must_use]
    pub fn guest_token(&self, key: SessionKey) -> Option<SecretString> {
        self.read(key, CredentialField::GuestSession)
            .map(SecretString::from)
    }

    pub fn set_guest_token(&self, key: SessionKey, token: &SecretString) {
        self.write(key, CredentialField::GuestSession, token.expose_secret());
    }

    #[must_use]
    pub fn guest_name(&self, key: SessionKey) -> Option<String> {
        self.read(key, CredentialField::GuestName)
    }

    pub fn set_guest_name(&self, key: SessionKey, name: &str) {
        self.write(key, CredentialField::GuestName, name);
    }

    #[must_use]
    pub fn guest_id(&self, key: SessionKey) -> Option<u64> {
        self.read(key, CredentialField::GuestId)?.parse().ok()
    }

    pub fn set_guest_id(&self, key: SessionKey, id: u64) {
        self.write(key, CredentialField::GuestId, &id.to_string());
    }

    #[must_use]
    pub fn verification_status(&self, key: SessionKey) -> Option<VerificationStatus> {
        self.read(key, CredentialField::VerificationStatus)?
            .parse()
            .ok()
    }

    pub fn set_verification_status(&self, key: SessionKey, status: VerificationStatus) {
        self.write(key, CredentialField::VerificationStatus, status.as_str());
    }

    /// Removes the guest fields only, leaving any bearer token in place.
    pub fn clear_guest(&self, key: SessionKey) {
        for field in CredentialField::GUEST {
            self.delete(key, field);
        }
    }

    /// Removes the whole credential record for one session key.
    pub fn clear_session(&self, key: SessionKey) {
        for field in CredentialField::ALL {
            self.delete(key, field);
        }
    }

    /// A credential record exists iff an auth token is present, or the key
    /// is a `share` session backed by a guest session token.
    #[must_use]
    pub fn has_live_credential(&self, key: SessionKey) -> bool {
        if self.read(key, CredentialField::Token).is_some() {
            return true;
        }
        key.session_type == SessionType::Share
            && self.read(key, CredentialField::GuestSession).is_some()
    }
}
