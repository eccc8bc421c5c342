//! Guest sub-identity model and lifecycle.
//!
//! A guest is a lower-trust identity nested inside a `share` session. It
//! authenticates with its own session token (never a bearer auth token) and
//! can be revoked by the server at any time, which is why it drags a whole
//! presence apparatus along: registration, liveness heartbeat, status
//! polling and server-driven invalidation.

pub mod api;
pub mod fingerprint;
pub mod presence;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use api::{GuestApi, GuestRegisterRequest};
pub use fingerprint::{device_identifier, DeviceProfile};
pub use presence::{GuestPresenceService, PresenceConfig};

/// Outcome of the organizer-side review of a guest's claimed identity.
///
/// Transitions only `Pending → Verified` or `Pending → Rejected`;
/// rejection is terminal for the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Pending,
    Rejected,
}

impl VerificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown verification status: {0}")]
pub struct UnknownVerificationStatus(String);

impl FromStr for VerificationStatus {
    type Err = UnknownVerificationStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(VerificationStatus::Verified),
            "pending" => Ok(VerificationStatus::Pending),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(UnknownVerificationStatus(other.to_string())),
        }
    }
}

/// Why the server revoked a guest identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationReason {
    Banned,
    Deleted,
    Rejected,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvalidationReason::Banned => "banned",
            InvalidationReason::Deleted => "deleted",
            InvalidationReason::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// The in-memory guest credential. Only ever exists for a `share` session.
#[derive(Debug, Clone)]
pub struct GuestIdentity {
    pub session_token: SecretString,
    pub guest_id: Option<u64>,
    pub guest_name: String,
    pub guest_email: Option<String>,
    pub verification_status: VerificationStatus,
}

/// Lifecycle of one guest identity. `Invalidated` is terminal: a fresh
/// `register` call starts a new identity from `Unregistered`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestState {
    Unregistered,
    Registering,
    Registered(VerificationStatus),
    Invalidated(InvalidationReason),
}

/// Raised exactly once when the server revokes the current guest identity.
/// Consumed by the embedder to force a logout and show `message`.
#[derive(Debug, Clone)]
pub struct SessionInvalidatedEvent {
    pub reason: InvalidationReason,
    pub message: String,
}
