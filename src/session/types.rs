//! Core session model: the composite session key, the cached project
//! snapshot, and the registry entry rendered in the session chooser.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Privilege tier of a login.
///
/// `Code` is the full-access contact login, `Share` the restricted guest
/// link, `Preview` a one-time admin preview. The absence of a resolved type
/// is [`crate::token::TokenType::Unknown`] and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Code,
    Share,
    Preview,
}

impl SessionType {
    pub const ALL: [SessionType; 3] = [SessionType::Code, SessionType::Share, SessionType::Preview];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Code => "code",
            SessionType::Share => "share",
            SessionType::Preview => "preview",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown session type: {0}")]
pub struct UnknownSessionType(String);

impl FromStr for SessionType {
    type Err = UnknownSessionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(SessionType::Code),
            "share" => Ok(SessionType::Share),
            "preview" => Ok(SessionType::Preview),
            other => Err(UnknownSessionType(other.to_string())),
        }
    }
}

/// Composite key isolating everything the layer stores:
/// the same project may hold a contact login, a guest link and an admin
/// preview at the same time without any of them seeing the others' data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub project_id: u64,
    pub session_type: SessionType,
}

impl SessionKey {
    #[must_use]
    pub fn new(project_id: u64, session_type: SessionType) -> Self {
        Self {
            project_id,
            session_type,
        }
    }

    /// Parses the `"{projectId}:{sessionType}"` wire form used by the
    /// active-session pointer. Anything malformed reads as absent.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (id, session_type) = raw.split_once(':')?;
        let project_id = id.parse().ok()?;
        let session_type = session_type.parse().ok()?;
        Some(Self {
            project_id,
            session_type,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_id, self.session_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPerson {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Server-provided denormalized project data, cached per session key so a
/// reload can render without a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_class_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<ContactPerson>,
}

/// One entry in the session registry: every (project, session type) pair
/// that ever authenticated on this device, independent of whether its
/// credential is still live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub project_id: u64,
    pub session_type: SessionType,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub last_used: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl StoredSession {
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.project_id, self.session_type)
    }
}
