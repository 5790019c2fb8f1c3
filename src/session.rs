//! Per-call state shared between a bridge, its tool dispatcher and observers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionStatus {
    /// Status only moves forward; `Closed` is terminal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self != Self::Closed && next > self
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

/// UI action an observer should perform, e.g. open a form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PendingAction {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    pub session_id: String,
    /// Assigned by the telephony side once its stream starts.
    pub stream_sid: Option<String>,
    pub status: SessionStatus,
    pub context: Map<String, Value>,
    pub pending_action: Option<PendingAction>,
}

impl CallSession {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            stream_sid: None,
            status: SessionStatus::Connecting,
            context: Map::new(),
            pending_action: None,
        }
    }

    /// Whether `key` names this session by id or by stream handle.
    #[must_use]
    pub fn answers_to(&self, key: &str) -> bool {
        self.session_id == key || self.stream_sid.as_deref() == Some(key)
    }
}

/// Keyed store of active calls.
///
/// Cloning shares the underlying map. Every mutation is scoped to one
/// session id and is refused once that session has been removed.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, CallSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `connecting` session under a fresh id.
    #[must_use]
    pub fn create(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if self.insert_with_id(&id).is_ok() {
                return id;
            }
        }
    }

    /// # Errors
    /// Returns [`Error::Protocol`] if a session with this id already exists.
    pub fn insert_with_id(&self, session_id: &str) -> Result<()> {
        match self.sessions.entry(session_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Protocol(format!(
                "session {session_id} already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(CallSession::new(session_id.to_string()));
                Ok(())
            }
        }
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<CallSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Look a session up by id, falling back to its stream handle.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<CallSession> {
        if let Some(session) = self.get(key) {
            return Some(session);
        }
        self.sessions
            .iter()
            .find(|entry| entry.stream_sid.as_deref() == Some(key))
            .map(|entry| entry.clone())
    }

    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn attach_stream(&self, session_id: &str, stream_sid: &str) -> bool {
        self.update(session_id, |session| {
            session.stream_sid = Some(stream_sid.to_string());
        })
    }

    /// Apply a forward status transition. Returns `false` if the session is
    /// gone or the transition would move backwards.
    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> bool {
        let mut applied = false;
        self.update(session_id, |session| {
            if session.status.can_transition_to(status) {
                session.status = status;
                applied = true;
            }
        });
        applied
    }

    /// Shallow-merge `patch` into the session context.
    pub fn merge_context(&self, session_id: &str, patch: Map<String, Value>) -> bool {
        self.update(session_id, |session| session.context.extend(patch))
    }

    /// Replace any outstanding action.
    pub fn set_pending_action(&self, session_id: &str, action: PendingAction) -> bool {
        self.update(session_id, |session| session.pending_action = Some(action))
    }

    /// Clear the outstanding action once it has been delivered, unless a
    /// newer action replaced it in the meantime.
    pub fn acknowledge_pending_action(&self, session_id: &str, delivered: &PendingAction) -> bool {
        self.sessions.get_mut(session_id).is_some_and(|mut session| {
            if session.pending_action.as_ref() == Some(delivered) {
                session.pending_action = None;
                true
            } else {
                false
            }
        })
    }

    pub fn remove(&self, session_id: &str) -> Option<CallSession> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn update(&self, session_id: &str, apply: impl FnOnce(&mut CallSession)) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if session.status != SessionStatus::Closed => {
                apply(&mut session);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique() {
        let store = SessionStore::new();
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert!(store.insert_with_id(&a).is_err());
    }

    #[test]
    fn status_only_moves_forward() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.set_status(&id, SessionStatus::Active));
        assert!(!store.set_status(&id, SessionStatus::Connecting));
        assert!(store.set_status(&id, SessionStatus::Closed));
        assert!(!store.set_status(&id, SessionStatus::Closing));
        assert!(!store.merge_context(&id, Map::new()));
    }

    #[test]
    fn find_matches_stream_handle() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.find("SS1").is_none());
        store.attach_stream(&id, "SS1");
        assert_eq!(store.find("SS1").unwrap().session_id, id);
        assert_eq!(store.find(&id).unwrap().stream_sid.as_deref(), Some("SS1"));
    }

    #[test]
    fn writes_after_removal_are_refused() {
        let store = SessionStore::new();
        let id = store.create();
        let mut patch = Map::new();
        patch.insert("customer".into(), json!("Ada"));
        assert!(store.merge_context(&id, patch.clone()));
        assert_eq!(store.remove(&id).unwrap().context["customer"], "Ada");
        assert!(!store.merge_context(&id, patch));
        assert!(!store.set_pending_action(&id, PendingAction::new("open-form")));
        assert!(store.is_empty());
    }

    #[test]
    fn acknowledging_clears_only_the_delivered_action() {
        let store = SessionStore::new();
        let id = store.create();
        let first = PendingAction::new("open-form").with_data(json!({ "id": 7 }));
        store.set_pending_action(&id, first.clone());
        store.set_pending_action(&id, PendingAction::new("close-form"));
        assert!(!store.acknowledge_pending_action(&id, &first));
        assert_eq!(store.get(&id).unwrap().pending_action.unwrap().name, "close-form");

        assert!(store.acknowledge_pending_action(&id, &PendingAction::new("close-form")));
        assert!(store.get(&id).unwrap().pending_action.is_none());
        assert!(!store.acknowledge_pending_action(&id, &first));
    }
}
