//! In-memory reactive view of the active session's credential.
//!
//! Guards and request interceptors read `token_type` and `can_finalize`
//! synchronously on every navigation, so both live in [`Signal`]s seeded
//! from storage at construction and kept consistent with storage by every
//! mutation. `update_metadata` is the only operation that advances the
//! machine's type; `set_token` is a pure credential write.

use crate::session::pointer::ActiveSessionPointer;
use crate::session::types::{SessionKey, SessionType};
use crate::signal::Signal;
use crate::storage::credentials::CredentialStore;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::debug;

/// The resolved privilege tier, or `Unknown` when no session is active.
/// `Unknown` is an in-memory state only; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Unknown,
    Code,
    Share,
    Preview,
}

impl From<SessionType> for TokenType {
    fn from(session_type: SessionType) -> Self {
        match session_type {
            SessionType::Code => TokenType::Code,
            SessionType::Share => TokenType::Share,
            SessionType::Preview => TokenType::Preview,
        }
    }
}

pub struct TokenStateMachine {
    credentials: CredentialStore,
    pointer: Arc<ActiveSessionPointer>,
    token_type: Signal<TokenType>,
    can_finalize: Signal<bool>,
}

impl TokenStateMachine {
    /// Builds the machine and seeds both signals from the active session.
    #[must_use]
    pub fn new(credentials: CredentialStore, pointer: Arc<ActiveSessionPointer>) -> Self {
        let machine = Self {
            credentials,
            pointer,
            token_type: Signal::new(TokenType::Unknown),
            can_finalize: Signal::new(false),
        };
        machine.initialize();
        machine
    }

    fn initialize(&self) {
        match self.pointer.get() {
            Some(key) => {
                self.token_type.set(key.session_type.into());
                self.can_finalize.set(self.credentials.can_finalize(key));
            }
            None => {
                self.token_type.set(TokenType::Unknown);
                self.can_finalize.set(false);
            }
        }
    }

    /// Re-seeds both signals from storage. Called after a session switch,
    /// once the active pointer has been rewritten.
    pub fn reinitialize(&self) {
        self.initialize();
    }

    #[must_use]
    pub fn token_type(&self) -> TokenType {
        self.token_type.get()
    }

    #[must_use]
    pub fn token_type_signal(&self) -> &Signal<TokenType> {
        &self.token_type
    }

    #[must_use]
    pub fn can_finalize(&self) -> bool {
        self.can_finalize.get()
    }

    #[must_use]
    pub fn can_finalize_signal(&self) -> &Signal<bool> {
        &self.can_finalize
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.token_type.get() == TokenType::Share
    }

    #[must_use]
    pub fn is_preview(&self) -> bool {
        self.token_type.get() == TokenType::Preview
    }

    /// Full read access: contact login or admin preview.
    #[must_use]
    pub fn has_full_access(&self) -> bool {
        matches!(self.token_type.get(), TokenType::Code | TokenType::Preview)
    }

    /// Pure write into the credential record; touches neither signal.
    pub fn set_token(&self, key: SessionKey, token: &SecretString) {
        self.credentials.set_auth_token(key, token);
    }

    /// Persists `can_finalize` and advances the machine's type. This is the
    /// only path that changes `token_type`.
    pub fn update_metadata(&self, key: SessionKey, can_finalize: bool) {
        self.credentials.set_can_finalize(key, can_finalize);
        self.can_finalize.set(can_finalize);
        self.token_type.set(key.session_type.into());
    }

    /// The active session's bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        let key = self.pointer.get()?;
        self.credentials.auth_token(key)
    }

    /// True when the active session is backed by a live credential: a bearer
    /// token, or — for `share` sessions — a guest session token. Guests
    /// authenticate purely through the nested guest token and never receive
    /// a bearer token, hence the dual condition.
    #[must_use]
    pub fn has_token(&self) -> bool {
        self.pointer
            .get()
            .is_some_and(|key| self.credentials.has_live_credential(key))
    }

    /// Clears the active session's credential record and resets both
    /// signals. Idempotent; a missing active session is not an error.
    pub fn clear(&self) {
        if let Some(key) = self.pointer.get() {
            debug!("clearing credential record for {key}");
            self.credentials.clear_session(key);
        }
        self.token_type.set(TokenType::Unknown);
        self.can_finalize.set(false);
    }
}
