//! Guest identity lifecycle: registration, liveness, server-driven
//! invalidation.
//!
//! Per identity the state machine is `Unregistered → Registering →
//! Registered(status) → Invalidated(reason)`, and `Invalidated` is terminal;
//! only a fresh `register` starts over. Two independent timer loops watch
//! the server: presence polling (is the guest still welcome) and
//! verification polling (has the organizer reviewed the claimed identity).
//! Both swallow transport errors — a missed poll must never surface to the
//! user — and both stamp every in-flight request with a generation counter
//! so a response that arrives after a logout or invalidation is discarded
//! instead of resurrecting a cleared session.

use super::api::{GuestApi, GuestRegisterRequest};
use super::fingerprint::{device_identifier, DeviceProfile};
use super::{
    GuestIdentity, GuestState, InvalidationReason, SessionInvalidatedEvent, VerificationStatus,
};
use crate::auth::api::AuthError;
use crate::session::pointer::ActiveSessionPointer;
use crate::session::registry::SessionRegistry;
use crate::session::types::{SessionKey, SessionType};
use crate::signal::{Emitter, Signal, Subscription};
use crate::storage::credentials::CredentialStore;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

const DEFAULT_PRESENCE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_VERIFICATION_INTERVAL: Duration = Duration::from_secs(5);

const BANNED_MESSAGE: &str = "Access denied. Please contact the organizers.";
const REJECTED_MESSAGE: &str =
    "Your identification request was rejected. Please choose another name.";
const DELETED_MESSAGE: &str = "Your guest session was removed.";

fn default_invalidation_message(reason: InvalidationReason) -> &'static str {
    match reason {
        InvalidationReason::Banned => BANNED_MESSAGE,
        InvalidationReason::Rejected => REJECTED_MESSAGE,
        InvalidationReason::Deleted => DELETED_MESSAGE,
    }
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub presence_interval: Duration,
    pub verification_interval: Duration,
    pub device: DeviceProfile,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_interval: DEFAULT_PRESENCE_INTERVAL,
            verification_interval: DEFAULT_VERIFICATION_INTERVAL,
            device: DeviceProfile::default(),
        }
    }
}

pub struct GuestPresenceService {
    api: GuestApi,
    credentials: CredentialStore,
    pointer: Arc<ActiveSessionPointer>,
    registry: SessionRegistry,
    config: PresenceConfig,
    /// Handle to ourselves for the spawned polling tasks.
    self_ref: Weak<GuestPresenceService>,
    state: Signal<GuestState>,
    identity: Mutex<Option<GuestIdentity>>,
    invalidated: Emitter<SessionInvalidatedEvent>,
    /// Set on the first invalidation of the current identity; guarantees the
    /// event fires exactly once even with both pollers racing.
    invalidation_latch: Mutex<bool>,
    presence_generation: AtomicU64,
    verification_generation: AtomicU64,
    presence_task: Mutex<Option<JoinHandle<()>>>,
    verification_task: Mutex<Option<JoinHandle<()>>>,
}

impl GuestPresenceService {
    #[must_use]
    pub fn new(
        api: GuestApi,
        credentials: CredentialStore,
        pointer: Arc<ActiveSessionPointer>,
        registry: SessionRegistry,
        config: PresenceConfig,
    ) -> Arc<Self> {
        let service = Arc::new_cyclic(|self_ref| Self {
            api,
            credentials,
            pointer,
            registry,
            config,
            self_ref: self_ref.clone(),
            state: Signal::new(GuestState::Unregistered),
            identity: Mutex::new(None),
            invalidated: Emitter::new(),
            invalidation_latch: Mutex::new(false),
            presence_generation: AtomicU64::new(0),
            verification_generation: AtomicU64::new(0),
            presence_task: Mutex::new(None),
            verification_task: Mutex::new(None),
        });
        service.load_from_storage();
        service
    }

    /// The active session key, if it is a `share` session. Guests exist
    /// nowhere else.
    fn active_share_key(&self) -> Option<SessionKey> {
        self.pointer
            .get()
            .filter(|key| key.session_type == SessionType::Share)
    }

    fn session_token(&self) -> Option<SecretString> {
        self.identity
            .lock()
            .as_ref()
            .map(|identity| identity.session_token.clone())
    }

    #[must_use]
    pub fn current_identity(&self) -> Option<GuestIdentity> {
        self.identity.lock().clone()
    }

    #[must_use]
    pub fn has_guest_session(&self) -> bool {
        self.identity.lock().is_some()
    }

    #[must_use]
    pub fn guest_name(&self) -> Option<String> {
        self.identity
            .lock()
            .as_ref()
            .map(|identity| identity.guest_name.clone())
    }

    #[must_use]
    pub fn state(&self) -> GuestState {
        self.state.get()
    }

    #[must_use]
    pub fn state_signal(&self) -> &Signal<GuestState> {
        &self.state
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.get() == GuestState::Registered(VerificationStatus::Pending)
    }

    /// Registers a listener for server-driven invalidation. The event fires
    /// at most once per identity and never as a thrown error — it can happen
    /// with no call in flight, purely from background polling.
    pub fn subscribe_invalidated(
        &self,
        listener: impl Fn(&SessionInvalidatedEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.invalidated.subscribe(listener)
    }

    /// Rehydrates the in-memory identity from the active `share` session's
    /// stored guest fields, if any.
    pub fn load_from_storage(&self) {
        let Some(key) = self.active_share_key() else {
            return;
        };
        let (Some(token), Some(name)) = (
            self.credentials.guest_token(key),
            self.credentials.guest_name(key),
        ) else {
            return;
        };

        let status = self
            .credentials
            .verification_status(key)
            .unwrap_or(VerificationStatus::Verified);
        *self.identity.lock() = Some(GuestIdentity {
            session_token: token,
            guest_id: self.credentials.guest_id(key),
            guest_name: name,
            guest_email: None,
            verification_status: status,
        });
        *self.invalidation_latch.lock() = false;
        self.state.set(GuestState::Registered(status));
    }

    fn persist_identity(&self, key: SessionKey, identity: &GuestIdentity) {
        self.credentials.set_guest_token(key, &identity.session_token);
        self.credentials.set_guest_name(key, &identity.guest_name);
        if let Some(id) = identity.guest_id {
            self.credentials.set_guest_id(key, id);
        }
        self.credentials
            .set_verification_status(key, identity.verification_status);
    }

    /// Adopts a guest identity delivered inside a login response (fresh or
    /// restored via magic link). Ignored for non-`share` keys — a guest
    /// identity is never valid standalone.
    pub fn store_from_login(&self, key: SessionKey, identity: GuestIdentity) {
        if key.session_type != SessionType::Share {
            debug!("ignoring guest identity for non-share session {key}");
            return;
        }
        self.presence_generation.fetch_add(1, Ordering::SeqCst);
        self.verification_generation.fetch_add(1, Ordering::SeqCst);
        *self.invalidation_latch.lock() = false;

        self.persist_identity(key, &identity);
        let status = identity.verification_status;
        *self.identity.lock() = Some(identity);
        self.state.set(GuestState::Registered(status));
    }

    /// Registers a fresh guest identity for the active `share` session,
    /// sending the device fingerprint for duplicate detection.
    /// # Errors
    /// `NoActiveSession` without an active `share` session; otherwise the
    /// mapped transport error. Nothing is stored on failure.
    pub async fn register(
        &self,
        guest_name: &str,
        guest_email: Option<&str>,
    ) -> Result<GuestIdentity, AuthError> {
        let key = self.active_share_key().ok_or(AuthError::NoActiveSession)?;

        // A fresh identity orphans anything still polling for the old one.
        self.presence_generation.fetch_add(1, Ordering::SeqCst);
        self.verification_generation.fetch_add(1, Ordering::SeqCst);
        *self.invalidation_latch.lock() = false;
        self.state.set(GuestState::Registering);

        let request = GuestRegisterRequest {
            guest_name: guest_name.to_string(),
            guest_email: guest_email.map(str::to_string),
            device_identifier: device_identifier(&self.config.device),
        };

        match self.api.register(&request).await {
            Ok(response) => {
                let status = response
                    .verification_status
                    .unwrap_or(VerificationStatus::Verified);
                let identity = GuestIdentity {
                    session_token: SecretString::from(response.session_token),
                    guest_id: Some(response.id),
                    guest_name: response.guest_name,
                    guest_email: response.guest_email,
                    verification_status: status,
                };

                self.persist_identity(key, &identity);
                self.registry
                    .update_user_name(key.project_id, key.session_type, &identity.guest_name);
                *self.identity.lock() = Some(identity.clone());
                self.state.set(GuestState::Registered(status));
                info!("guest registered for {key}");
                Ok(identity)
            }
            Err(e) => {
                self.state.set(GuestState::Unregistered);
                Err(e)
            }
        }
    }

    /// One-shot confirmation that the stored guest token is still accepted.
    /// Backfills the guest id from the response; an invalid verdict (or a
    /// failed call) clears the local guest credential without raising an
    /// invalidation event.
    pub async fn validate(&self) -> bool {
        let Some(token) = self.session_token() else {
            return false;
        };

        match self.api.validate(&token).await {
            Ok(response) if response.valid => {
                if let Some(data) = response.data {
                    if let Some(key) = self.active_share_key() {
                        self.credentials.set_guest_id(key, data.id);
                    }
                    if let Some(identity) = self.identity.lock().as_mut() {
                        identity.guest_id = Some(data.id);
                    }
                }
                true
            }
            Ok(_) => {
                debug!("stored guest session no longer valid");
                self.clear_local();
                false
            }
            Err(e) => {
                debug!("guest validation failed: {e}");
                self.clear_local();
                false
            }
        }
    }

    /// Renames the registered guest on the server and locally.
    /// # Errors
    /// `NoGuestSession` without a registered identity; otherwise the mapped
    /// transport error.
    pub async fn update_guest_info(
        &self,
        guest_name: &str,
        guest_email: Option<&str>,
    ) -> Result<GuestIdentity, AuthError> {
        let token = self.session_token().ok_or(AuthError::NoGuestSession)?;

        let response = self
            .api
            .update_guest(&token, guest_name, guest_email)
            .await?;

        if let Some(key) = self.active_share_key() {
            self.credentials.set_guest_name(key, &response.guest_name);
            self.registry
                .update_user_name(key.project_id, key.session_type, &response.guest_name);
        }

        let mut identity_slot = self.identity.lock();
        let Some(identity) = identity_slot.as_mut() else {
            return Err(AuthError::NoGuestSession);
        };
        identity.session_token = SecretString::from(response.session_token);
        identity.guest_name = response.guest_name;
        identity.guest_email = response.guest_email;
        Ok(identity.clone())
    }

    /// Fire-and-forget liveness signal; failures are logged and dropped.
    pub async fn send_heartbeat(&self) {
        let Some(token) = self.session_token() else {
            return;
        };
        if let Err(e) = self.api.heartbeat(&token).await {
            debug!("heartbeat failed: {e}");
        }
    }

    /// Starts the presence loop. Idempotent: a second call while the loop
    /// runs is a no-op, so two callers can never stack duplicate loops.
    pub fn start_presence_polling(&self) {
        let mut task_slot = self.presence_task.lock();
        if task_slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        if self.identity.lock().is_none() {
            return;
        }
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let my_generation = self.presence_generation.load(Ordering::SeqCst);
        *task_slot = Some(tokio::spawn(async move {
            let mut ticker = interval(service.config.presence_interval);
            loop {
                ticker.tick().await;
                if service.presence_generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }
                let Some(token) = service.session_token() else {
                    return;
                };

                let result = service.api.session_status(&token).await;
                if service.presence_generation.load(Ordering::SeqCst) != my_generation {
                    debug!("discarding stale presence result");
                    return;
                }

                match result {
                    Ok(status) if !status.valid => {
                        if let Some(reason) = status.reason {
                            let message = status
                                .message
                                .unwrap_or_else(|| default_invalidation_message(reason).to_string());
                            service.handle_invalidation(reason, message);
                        }
                        return;
                    }
                    Ok(_) => {}
                    // Transient connectivity loss: keep polling quietly.
                    Err(e) => debug!("presence poll failed, will retry: {e}"),
                }
            }
        }));
    }

    /// Stops the presence loop and orphans any in-flight request. Safe to
    /// call repeatedly, and before the loop ever started.
    pub fn stop_presence_polling(&self) {
        self.presence_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.presence_task.lock().take() {
            task.abort();
        }
    }

    /// Starts the verification loop. Only meaningful while the identity is
    /// pending organizer review; idempotent like the presence loop.
    pub fn start_verification_polling(&self) {
        let mut task_slot = self.verification_task.lock();
        if task_slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let pending = self
            .identity
            .lock()
            .as_ref()
            .is_some_and(|identity| identity.verification_status == VerificationStatus::Pending);
        if !pending {
            return;
        }
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let my_generation = self.verification_generation.load(Ordering::SeqCst);
        *task_slot = Some(tokio::spawn(async move {
            let mut ticker = interval(service.config.verification_interval);
            loop {
                ticker.tick().await;
                if service.verification_generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }
                let Some(token) = service.session_token() else {
                    return;
                };

                let result = service.api.verification_status(&token).await;
                if service.verification_generation.load(Ordering::SeqCst) != my_generation {
                    debug!("discarding stale verification result");
                    return;
                }

                match result {
                    Ok(status) => {
                        if status.is_banned {
                            service.handle_invalidation(
                                InvalidationReason::Banned,
                                BANNED_MESSAGE.to_string(),
                            );
                            return;
                        }
                        if status.is_rejected {
                            service.handle_invalidation(
                                InvalidationReason::Rejected,
                                REJECTED_MESSAGE.to_string(),
                            );
                            return;
                        }

                        service.apply_verification_status(status.verification_status);
                        if status.is_verified {
                            info!("guest identity verified");
                            return;
                        }
                    }
                    Err(e) => debug!("verification poll failed, will retry: {e}"),
                }
            }
        }));
    }

    /// Stops the verification loop; same guarantees as
    /// [`Self::stop_presence_polling`].
    pub fn stop_verification_polling(&self) {
        self.verification_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.verification_task.lock().take() {
            task.abort();
        }
    }

    fn apply_verification_status(&self, status: VerificationStatus) {
        if let Some(key) = self.active_share_key() {
            self.credentials.set_verification_status(key, status);
        }
        let applied = {
            let mut identity_slot = self.identity.lock();
            match identity_slot.as_mut() {
                Some(identity) => {
                    identity.verification_status = status;
                    true
                }
                None => false,
            }
        };
        if applied {
            self.state.set(GuestState::Registered(status));
        }
    }

    /// The single funnel for server-driven revocation: clears the local
    /// guest credential, flips to the terminal state, and emits the
    /// invalidation event — exactly once per identity, no matter how many
    /// pollers race here.
    fn handle_invalidation(&self, reason: InvalidationReason, message: String) {
        {
            let mut latch = self.invalidation_latch.lock();
            if *latch {
                return;
            }
            *latch = true;
        }

        self.presence_generation.fetch_add(1, Ordering::SeqCst);
        self.verification_generation.fetch_add(1, Ordering::SeqCst);

        if let Some(key) = self.active_share_key() {
            self.credentials.clear_guest(key);
        }
        *self.identity.lock() = None;
        self.state.set(GuestState::Invalidated(reason));
        warn!("guest session invalidated: {reason}");
        self.invalidated
            .emit(&SessionInvalidatedEvent { reason, message });

        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        if let Some(task) = self.presence_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.verification_task.lock().take() {
            task.abort();
        }
    }

    fn clear_local(&self) {
        if let Some(key) = self.active_share_key() {
            self.credentials.clear_guest(key);
        }
        *self.identity.lock() = None;
        self.state.set(GuestState::Unregistered);
    }

    /// Logout path: stops both loops, orphans in-flight requests, and wipes
    /// the identity without raising an invalidation event.
    pub fn clear(&self) {
        self.presence_generation.fetch_add(1, Ordering::SeqCst);
        self.verification_generation.fetch_add(1, Ordering::SeqCst);
        self.abort_tasks();
        self.clear_local();
        *self.invalidation_latch.lock() = false;
    }
}
