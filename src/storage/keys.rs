//! Durable-store key scheme.
//!
//! Credential fields are isolated per (project, session type):
//! `tablo:{projectId}:{sessionType}:{field}`. The active-session pointer and
//! the session registry live under fixed keys. The flat `tablo_*` keys are
//! the pre-isolation scheme handled by the migrator.

use crate::session::types::SessionKey;
use std::fmt;

pub const ACTIVE_SESSION_KEY: &str = "tablo:active_session";
pub const SESSIONS_KEY: &str = "tablo:sessions";
pub const FILTERS_KEY: &str = "tablo:filters";

pub const LEGACY_AUTH_TOKEN_KEY: &str = "tablo_auth_token";
pub const LEGACY_PROJECT_KEY: &str = "tablo_project";
pub const LEGACY_TOKEN_TYPE_KEY: &str = "tablo_token_type";
pub const LEGACY_CAN_FINALIZE_KEY: &str = "tablo_can_finalize";

/// A credential-record field under one session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Token,
    Project,
    CanFinalize,
    GuestSession,
    GuestName,
    GuestId,
    VerificationStatus,
}

impl CredentialField {
    pub const ALL: [CredentialField; 7] = [
        CredentialField::Token,
        CredentialField::Project,
        CredentialField::CanFinalize,
        CredentialField::GuestSession,
        CredentialField::GuestName,
        CredentialField::GuestId,
        CredentialField::VerificationStatus,
    ];

    pub const GUEST: [CredentialField; 4] = [
        CredentialField::GuestSession,
        CredentialField::GuestName,
        CredentialField::GuestId,
        CredentialField::VerificationStatus,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialField::Token => "token",
            CredentialField::Project => "project",
            CredentialField::CanFinalize => "can_finalize",
            CredentialField::GuestSession => "guest_session",
            CredentialField::GuestName => "guest_name",
            CredentialField::GuestId => "guest_id",
            CredentialField::VerificationStatus => "verification_status",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn credential_key(key: SessionKey, field: CredentialField) -> String {
    format!(
        "tablo:{}:{}:{}",
        key.project_id,
        key.session_type.as_str(),
        field.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::SessionType;

    #[test]
    fn credential_keys_follow_the_isolated_scheme() {
        let key = SessionKey::new(123, SessionType::Share);
        assert_eq!(
            credential_key(key, CredentialField::GuestSession),
            "tablo:123:share:guest_session"
        );
        assert_eq!(
            credential_key(key, CredentialField::Token),
            "tablo:123:share:token"
        );
    }
}
