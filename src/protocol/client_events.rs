use serde::{Deserialize, Serialize};
use super::models::{Item, SessionUpdate};

/// Events the bridge sends on the upstream realtime leg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionUpdate>,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        /// Base64-encoded PCM16.
        audio: String,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Box<Item>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

impl ClientEvent {
    #[must_use]
    pub fn session_update(session: SessionUpdate) -> Self {
        Self::SessionUpdate {
            event_id: None,
            session: Box::new(session),
        }
    }

    #[must_use]
    pub const fn audio_append(audio: String) -> Self {
        Self::InputAudioBufferAppend { event_id: None, audio }
    }

    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(Item::function_call_output(call_id, output)),
        }
    }

    #[must_use]
    pub const fn response_create() -> Self {
        Self::ResponseCreate { event_id: None }
    }

    /// Wire name of the event, e.g. `response.create`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate { .. } => "response.create",
            Self::ResponseCancel { .. } => "response.cancel",
        }
    }
}
