//! Registry of every session that ever authenticated on this device.
//!
//! Backs the session chooser. Stored as one serialized JSON list under a
//! single key; mutation is read-modify-write, so concurrent tabs get
//! last-write-wins and nothing stronger. The list is display data only —
//! whether an entry's credential is still live is checked elsewhere, and a
//! stale entry is evicted by the caller, never here.

use crate::session::types::{SessionType, StoredSession};
use crate::storage::keys::SESSIONS_KEY;
use crate::storage::kv::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct SessionRegistry {
    kv: Arc<KeyValueStore>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(kv: Arc<KeyValueStore>) -> Self {
        Self { kv }
    }

    /// All known sessions, most recently used first. A malformed list is
    /// deleted and read as empty.
    #[must_use]
    pub fn list(&self) -> Vec<StoredSession> {
        let Some(raw) = self.kv.get(SESSIONS_KEY) else {
            return Vec::new();
        };
        let mut sessions: Vec<StoredSession> = match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                debug!("discarding malformed session registry: {e}");
                self.kv.remove(SESSIONS_KEY);
                return Vec::new();
            }
        };
        sessions.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        sessions
    }

    fn save(&self, sessions: &[StoredSession]) {
        match serde_json::to_string(sessions) {
            Ok(raw) => self.kv.set(SESSIONS_KEY, &raw),
            Err(e) => debug!("failed to serialize session registry: {e}"),
        }
    }

    /// Upsert keyed by (project, session type). An existing entry keeps any
    /// field the incoming entry does not provide, so updating the user name
    /// after guest registration does not erase a previously stored avatar.
    /// `last_used` is always stamped to now.
    pub fn add(&self, entry: StoredSession) {
        let mut sessions = self.list();
        let now = Utc::now();

        if let Some(existing) = sessions
            .iter_mut()
            .find(|s| s.key() == entry.key())
        {
            existing.project_name = entry.project_name;
            if entry.user_name.is_some() {
                existing.user_name = entry.user_name;
            }
            if entry.avatar.is_some() {
                existing.avatar = entry.avatar;
            }
            existing.last_used = now;
        } else {
            sessions.push(StoredSession {
                last_used: now,
                ..entry
            });
        }

        self.save(&sessions);
    }

    pub fn remove(&self, project_id: u64, session_type: SessionType) {
        let mut sessions = self.list();
        sessions.retain(|s| !(s.project_id == project_id && s.session_type == session_type));
        self.save(&sessions);
    }

    pub fn update_last_used(&self, project_id: u64, session_type: SessionType) {
        let mut sessions = self.list();
        if let Some(session) = sessions
            .iter_mut()
            .find(|s| s.project_id == project_id && s.session_type == session_type)
        {
            session.last_used = Utc::now();
            self.save(&sessions);
        }
    }

    pub fn update_user_name(&self, project_id: u64, session_type: SessionType, user_name: &str) {
        let mut sessions = self.list();
        if let Some(session) = sessions
            .iter_mut()
            .find(|s| s.project_id == project_id && s.session_type == session_type)
        {
            session.user_name = Some(user_name.to_string());
            session.last_used = Utc::now();
            self.save(&sessions);
        }
    }

    #[must_use]
    pub fn find(&self, project_id: u64, session_type: SessionType) -> Option<StoredSession> {
        self.list()
            .into_iter()
            .find(|s| s.project_id == project_id && s.session_type == session_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::MemoryBackend;
    use chrono::{Duration, Utc};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(KeyValueStore::new(Arc::new(MemoryBackend::new()))))
    }

    fn entry(project_id: u64, session_type: SessionType) -> StoredSession {
        StoredSession {
            project_id,
            session_type,
            project_name: format!("Project {project_id}"),
            user_name: None,
            last_used: Utc::now() - Duration::days(1),
            avatar: None,
        }
    }

    #[test]
    fn add_twice_updates_in_place_without_duplicating() {
        let registry = registry();
        registry.add(entry(7, SessionType::Code));
        let first = registry.find(7, SessionType::Code).unwrap();

        registry.add(StoredSession {
            user_name: Some("Kovács Anna".to_string()),
            ..entry(7, SessionType::Code)
        });

        let sessions = registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_name.as_deref(), Some("Kovács Anna"));
        assert!(sessions[0].last_used >= first.last_used);
    }

    #[test]
    fn merge_keeps_fields_the_update_does_not_carry() {
        let registry = registry();
        registry.add(StoredSession {
            avatar: Some("a.png".to_string()),
            ..entry(7, SessionType::Share)
        });
        // Partial update: new user name, no avatar.
        registry.add(StoredSession {
            user_name: Some("Guest".to_string()),
            ..entry(7, SessionType::Share)
        });

        let session = registry.find(7, SessionType::Share).unwrap();
        assert_eq!(session.avatar.as_deref(), Some("a.png"));
        assert_eq!(session.user_name.as_deref(), Some("Guest"));
    }

    #[test]
    fn list_orders_by_last_used_descending() {
        let registry = registry();
        registry.add(entry(1, SessionType::Code));
        registry.add(entry(2, SessionType::Share));
        registry.update_last_used(1, SessionType::Code);

        let sessions = registry.list();
        assert_eq!(sessions[0].project_id, 1);
        assert_eq!(sessions[1].project_id, 2);
    }

    #[test]
    fn same_project_different_types_are_distinct_entries() {
        let registry = registry();
        registry.add(entry(7, SessionType::Code));
        registry.add(entry(7, SessionType::Share));
        assert_eq!(registry.list().len(), 2);

        registry.remove(7, SessionType::Code);
        let sessions = registry.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_type, SessionType::Share);
    }

    #[test]
    fn malformed_registry_reads_as_empty() {
        let kv = Arc::new(KeyValueStore::new(Arc::new(MemoryBackend::new())));
        kv.set(SESSIONS_KEY, "{oops");
        let registry = SessionRegistry::new(Arc::clone(&kv));
        assert!(registry.list().is_empty());
        assert!(kv.get(SESSIONS_KEY).is_none());
    }
}
