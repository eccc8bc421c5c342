//! The public facade over the session layer.
//!
//! Login, restore and logout each touch several components in a fixed
//! order; the orchestrator owns those sequences so no caller ever has to
//! know them. A failed login touches no storage at all. A failed restore
//! leaves the registry entry in place — eviction after a transient failure
//! would silently delete history, so that decision stays with the caller.

use super::api::{
    AuthClient, AuthError, AuthHeader, LoginRequest, LoginResponse, ValidateSessionResponse,
};
use crate::guest::{GuestIdentity, GuestPresenceService};
use crate::session::pointer::ActiveSessionPointer;
use crate::session::registry::SessionRegistry;
use crate::session::types::{ProjectSnapshot, SessionKey, SessionType, StoredSession};
use crate::storage::credentials::CredentialStore;
use crate::storage::filters::FilterStore;
use crate::token::TokenStateMachine;
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, info};

/// What a successful login resolved to.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub key: SessionKey,
    pub project: ProjectSnapshot,
    pub can_finalize: bool,
    pub guest: Option<GuestIdentity>,
}

pub struct SessionOrchestrator {
    api: AuthClient,
    credentials: CredentialStore,
    registry: SessionRegistry,
    pointer: Arc<ActiveSessionPointer>,
    token: Arc<TokenStateMachine>,
    guest: Arc<GuestPresenceService>,
    filters: FilterStore,
}

impl SessionOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: AuthClient,
        credentials: CredentialStore,
        registry: SessionRegistry,
        pointer: Arc<ActiveSessionPointer>,
        token: Arc<TokenStateMachine>,
        guest: Arc<GuestPresenceService>,
        filters: FilterStore,
    ) -> Self {
        Self {
            api,
            credentials,
            registry,
            pointer,
            token,
            guest,
            filters,
        }
    }

    /// Performs a login and, on success, the full write sequence:
    /// credential record, registry entry, active pointer, then the guest
    /// identity when the response carries one.
    /// # Errors
    /// Returns the mapped [`AuthError`] without touching any storage.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let response = self.api.login(&request).await?;

        // The server may override the requested tier (a share link upgraded
        // to a contact login, for instance).
        let session_type = response
            .token_type
            .unwrap_or_else(|| request.session_type());
        let key = SessionKey::new(response.project.id, session_type);
        let can_finalize = response
            .can_finalize
            .unwrap_or(session_type == SessionType::Code);

        if let Some(token) = &response.token {
            self.token
                .set_token(key, &SecretString::from(token.clone()));
        }
        self.token.update_metadata(key, can_finalize);
        self.credentials.set_project(key, &response.project);

        self.registry.add(StoredSession {
            project_id: key.project_id,
            session_type,
            project_name: response.project.name.clone(),
            user_name: display_name(&response, session_type),
            last_used: Utc::now(),
            avatar: None,
        });

        self.pointer.set(key);

        let guest = self.adopt_guest_identity(key, &response);

        info!("logged in to {key}");
        Ok(LoginOutcome {
            key,
            project: response.project,
            can_finalize,
            guest,
        })
    }

    fn adopt_guest_identity(
        &self,
        key: SessionKey,
        response: &LoginResponse,
    ) -> Option<GuestIdentity> {
        if key.session_type != SessionType::Share {
            return None;
        }
        let payload = response
            .guest_session
            .clone()
            .or_else(|| response.restored_session.clone())?;
        let identity = payload.into_identity();
        self.guest.store_from_login(key, identity.clone());
        Some(identity)
    }

    /// Switches this tab to a previously stored session. Returns whether a
    /// live credential actually backs it; on `false` the registry entry is
    /// deliberately left alone.
    pub fn restore_session(&self, project_id: u64, session_type: SessionType) -> bool {
        let key = SessionKey::new(project_id, session_type);

        self.pointer.set(key);
        self.registry.update_last_used(project_id, session_type);
        self.token.reinitialize();

        if self.credentials.project(key).is_none() {
            debug!("restore failed: no cached project for {key}");
            return false;
        }

        match session_type {
            SessionType::Share => {
                if self.credentials.guest_token(key).is_none() {
                    debug!("restore failed: no guest session for {key}");
                    return false;
                }
                self.guest.load_from_storage();
                true
            }
            _ => self.token.has_token(),
        }
    }

    /// Revalidates the active session server-side, refreshing the cached
    /// project and finalize flag from the response. A 401 clears auth.
    /// # Errors
    /// `NoActiveSession` without a live active session; otherwise the
    /// mapped transport error.
    pub async fn validate_session(&self) -> Result<ValidateSessionResponse, AuthError> {
        let key = self.pointer.get().ok_or(AuthError::NoActiveSession)?;
        let auth = self.auth_header(key).ok_or(AuthError::NoActiveSession)?;

        match self.api.validate_session(&auth).await {
            Ok(response) => {
                if response.valid {
                    if let Some(project) = &response.project {
                        self.credentials.set_project(key, project);
                    }
                    if let Some(can_finalize) = response.can_finalize {
                        self.token.update_metadata(key, can_finalize);
                    }
                }
                Ok(response)
            }
            Err(AuthError::Unauthorized) => {
                self.clear_auth();
                Err(AuthError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    /// Logs out on the server, then clears locally — the local sweep runs
    /// even when the server call fails.
    /// # Errors
    /// Returns the server-side failure, after local state is already gone.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let auth = self.pointer.get().and_then(|key| self.auth_header(key));
        let result = match auth {
            Some(auth) => self.api.logout(&auth).await,
            None => Ok(()),
        };
        self.clear_auth();
        result
    }

    /// Clears the active session: credential record, registry entry, every
    /// persisted UI filter (so the next login on a shared device cannot see
    /// this user's saved filters), and finally the tab's active pointer.
    pub fn clear_auth(&self) {
        let active = self.pointer.get();

        self.guest.clear();
        self.token.clear();
        if let Some(key) = active {
            self.registry.remove(key.project_id, key.session_type);
        }
        self.filters.clear_all();
        self.pointer.clear();
    }

    fn auth_header(&self, key: SessionKey) -> Option<AuthHeader> {
        if let Some(token) = self.credentials.auth_token(key) {
            return Some(AuthHeader::Bearer(token));
        }
        if key.session_type == SessionType::Share {
            if let Some(token) = self.credentials.guest_token(key) {
                return Some(AuthHeader::Guest(token));
            }
        }
        None
    }
}

fn display_name(response: &LoginResponse, session_type: SessionType) -> Option<String> {
    if let Some(guest) = response
        .guest_session
        .as_ref()
        .or(response.restored_session.as_ref())
    {
        return Some(guest.guest_name.clone());
    }
    match session_type {
        SessionType::Code => response
            .project
            .contacts
            .first()
            .map(|contact| contact.name.clone()),
        SessionType::Preview => Some("Admin preview".to_string()),
        SessionType::Share => None,
    }
}
