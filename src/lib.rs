//! Client-resident multi-session identity layer.
//!
//! One device may hold credentials for several independent projects at the
//! same time, each through one of three privilege tiers: a full-access
//! contact login (`code`), a restricted guest link (`share`), or a one-time
//! admin preview (`preview`). This crate keeps those credentials isolated
//! per (project, session-type) pair, resolves which session is "current"
//! per tab without leaking one tab's session into another, survives storage
//! backends that silently fail, migrates the pre-isolation key scheme, and
//! maintains the live guest-presence channel (registration, heartbeat,
//! server-driven invalidation).
//!
//! The crate is host-agnostic: both storage tiers and the device profile
//! are injected. [`SessionLayer::new`] is the composition root — it wires
//! one instance of every component and runs the legacy migration before
//! anything else reads state.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablo_session::storage::{FileBackend, MemoryBackend};
//! use tablo_session::{LoginRequest, SessionConfig, SessionLayer};
//!
//! # async fn run() -> Result<(), tablo_session::AuthError> {
//! let layer = SessionLayer::new(
//!     Arc::new(FileBackend::new("/var/lib/tablo/session-store.json")),
//!     Arc::new(MemoryBackend::new()),
//!     SessionConfig::new("https://api.example.com/tablo-frontend"),
//! )?;
//!
//! let outcome = layer
//!     .orchestrator
//!     .login(LoginRequest::AccessCode { code: "123456".into() })
//!     .await?;
//! println!("signed in to {}", outcome.project.name);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod guest;
pub mod session;
pub mod signal;
pub mod storage;
pub mod token;

pub use auth::api::{AuthError, LoginRequest};
pub use auth::orchestrator::{LoginOutcome, SessionOrchestrator};
pub use guest::{
    DeviceProfile, GuestIdentity, GuestPresenceService, GuestState, InvalidationReason,
    PresenceConfig, SessionInvalidatedEvent, VerificationStatus,
};
pub use session::types::{ProjectSnapshot, SessionKey, SessionType, StoredSession};
pub use signal::{Signal, Subscription};
pub use token::{TokenStateMachine, TokenType};

use auth::api::AuthClient;
use guest::api::GuestApi;
use session::migrate::LegacyMigrator;
use session::pointer::ActiveSessionPointer;
use session::registry::SessionRegistry;
use std::sync::Arc;
use storage::{CredentialStore, FilterStore, KeyValueStore, StorageBackend};
use tracing::debug;

/// Configuration for the composition root.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend API, e.g. `https://api.example.com/tablo-frontend`.
    pub api_base_url: String,
    pub presence: PresenceConfig,
}

impl SessionConfig {
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            presence: PresenceConfig::default(),
        }
    }
}

/// One wired instance of the whole layer — one per process.
///
/// The durable backend is shared by every tab of the application; the
/// tab-scoped backend belongs to this instance alone and only ever carries
/// the active-session pointer.
pub struct SessionLayer {
    pub credentials: CredentialStore,
    pub registry: SessionRegistry,
    pub filters: FilterStore,
    pub pointer: Arc<ActiveSessionPointer>,
    pub token: Arc<TokenStateMachine>,
    pub guest: Arc<GuestPresenceService>,
    pub orchestrator: SessionOrchestrator,
}

impl SessionLayer {
    /// Wires the component graph. The legacy migration runs first, before
    /// any component reads state; a migrated session becomes the active one
    /// only when no pointer exists yet.
    /// # Errors
    /// Fails when an HTTP client cannot be constructed.
    pub fn new(
        durable_backend: Arc<dyn StorageBackend>,
        tab_backend: Arc<dyn StorageBackend>,
        config: SessionConfig,
    ) -> Result<Self, AuthError> {
        let durable = Arc::new(KeyValueStore::new(durable_backend));
        let tab = Arc::new(KeyValueStore::new(tab_backend));
        let credentials = CredentialStore::new(Arc::clone(&durable));

        let migrated = LegacyMigrator::new(Arc::clone(&durable), credentials.clone()).run();

        let pointer = Arc::new(ActiveSessionPointer::new(
            tab,
            Arc::clone(&durable),
            credentials.clone(),
        ));
        if let Some(key) = migrated {
            if pointer.get().is_none() {
                debug!("adopting migrated session {key}");
                pointer.set(key);
            }
        }

        let registry = SessionRegistry::new(Arc::clone(&durable));
        let filters = FilterStore::new(Arc::clone(&durable));
        let token = Arc::new(TokenStateMachine::new(
            credentials.clone(),
            Arc::clone(&pointer),
        ));
        let guest = GuestPresenceService::new(
            GuestApi::new(config.api_base_url.clone())?,
            credentials.clone(),
            Arc::clone(&pointer),
            registry.clone(),
            config.presence,
        );
        let orchestrator = SessionOrchestrator::new(
            AuthClient::new(config.api_base_url)?,
            credentials.clone(),
            registry.clone(),
            Arc::clone(&pointer),
            Arc::clone(&token),
            Arc::clone(&guest),
            filters.clone(),
        );

        Ok(Self {
            credentials,
            registry,
            filters,
            pointer,
            token,
            guest,
            orchestrator,
        })
    }
}
