//! Messages pushed to observer clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{CallSession, PendingAction, SessionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ObserverMessage {
    /// Full snapshot of a session's business context.
    SessionUpdate {
        data: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<SessionSummary>,
    },
    /// A UI action the observer should perform.
    Action {
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

/// Lifecycle fields sent next to the context in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,
    pub status: SessionStatus,
}

impl ObserverMessage {
    #[must_use]
    pub fn snapshot(session: &CallSession) -> Self {
        Self::SessionUpdate {
            data: session.context.clone(),
            session: Some(SessionSummary {
                id: session.session_id.clone(),
                stream_sid: session.stream_sid.clone(),
                status: session.status,
            }),
        }
    }

    #[must_use]
    pub fn action(action: PendingAction) -> Self {
        Self::Action {
            action: action.name,
            data: action.data,
        }
    }
}
