use serde::{Deserialize, Deserializer, Serialize, Serializer};
use super::models::{ArbitraryJson, Item, Response, Session};
use crate::error::ServerError;

/// Events received on the upstream realtime leg.
///
/// Events the bridge does not act on deserialize to [`ServerEvent::Unknown`]
/// instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error {
        event_id: String,
        error: ServerError,
    },
    SessionCreated {
        event_id: String,
        session: Session,
    },
    SessionUpdated {
        event_id: String,
        session: Session,
    },
    InputAudioBufferSpeechStarted {
        event_id: String,
        audio_start_ms: u32,
        item_id: String,
    },
    InputAudioBufferSpeechStopped {
        event_id: String,
        audio_end_ms: u32,
        item_id: String,
    },
    ResponseCreated {
        event_id: String,
        response: Response,
    },
    ResponseDone {
        event_id: String,
        response: Response,
    },
    ResponseAudioDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        /// Base64-encoded PCM16 chunk.
        delta: String,
    },
    ResponseAudioDone {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
    },
    ResponseOutputItemDone {
        event_id: String,
        response_id: String,
        output_index: u32,
        item: Item,
    },
    Unknown(ArbitraryJson),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_start_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        audio_end_ms: u32,
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        event_id: String,
        response: Response,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        event_id: String,
        response: Response,
    },
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.audio.done", alias = "response.output_audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        output_index: u32,
        #[serde(default)]
        content_index: u32,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        #[serde(default)]
        event_id: String,
        #[serde(default)]
        response_id: String,
        #[serde(default)]
        output_index: u32,
        item: Item,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => Self::SessionCreated { event_id, session },
            ServerEventRepr::SessionUpdated { event_id, session } => Self::SessionUpdated { event_id, session },
            ServerEventRepr::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id } => Self::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id },
            ServerEventRepr::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id } => Self::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id },
            ServerEventRepr::ResponseCreated { event_id, response } => Self::ResponseCreated { event_id, response },
            ServerEventRepr::ResponseDone { event_id, response } => Self::ResponseDone { event_id, response },
            ServerEventRepr::ResponseAudioDelta { event_id, response_id, item_id, output_index, content_index, delta } => Self::ResponseAudioDelta { event_id, response_id, item_id, output_index, content_index, delta },
            ServerEventRepr::ResponseAudioDone { event_id, response_id, item_id, output_index, content_index } => Self::ResponseAudioDone { event_id, response_id, item_id, output_index, content_index },
            ServerEventRepr::ResponseOutputItemDone { event_id, response_id, output_index, item } => Self::ResponseOutputItemDone { event_id, response_id, output_index, item },
        }
    }
}

impl Serialize for ServerEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let repr = match self {
            Self::Unknown(value) => return value.serialize(serializer),
            Self::Error { event_id, error } => ServerEventRepr::Error { event_id: event_id.clone(), error: error.clone() },
            Self::SessionCreated { event_id, session } => ServerEventRepr::SessionCreated { event_id: event_id.clone(), session: session.clone() },
            Self::SessionUpdated { event_id, session } => ServerEventRepr::SessionUpdated { event_id: event_id.clone(), session: session.clone() },
            Self::InputAudioBufferSpeechStarted { event_id, audio_start_ms, item_id } => ServerEventRepr::InputAudioBufferSpeechStarted { event_id: event_id.clone(), audio_start_ms: *audio_start_ms, item_id: item_id.clone() },
            Self::InputAudioBufferSpeechStopped { event_id, audio_end_ms, item_id } => ServerEventRepr::InputAudioBufferSpeechStopped { event_id: event_id.clone(), audio_end_ms: *audio_end_ms, item_id: item_id.clone() },
            Self::ResponseCreated { event_id, response } => ServerEventRepr::ResponseCreated { event_id: event_id.clone(), response: response.clone() },
            Self::ResponseDone { event_id, response } => ServerEventRepr::ResponseDone { event_id: event_id.clone(), response: response.clone() },
            Self::ResponseAudioDelta { event_id, response_id, item_id, output_index, content_index, delta } => ServerEventRepr::ResponseAudioDelta { event_id: event_id.clone(), response_id: response_id.clone(), item_id: item_id.clone(), output_index: *output_index, content_index: *content_index, delta: delta.clone() },
            Self::ResponseAudioDone { event_id, response_id, item_id, output_index, content_index } => ServerEventRepr::ResponseAudioDone { event_id: event_id.clone(), response_id: response_id.clone(), item_id: item_id.clone(), output_index: *output_index, content_index: *content_index },
            Self::ResponseOutputItemDone { event_id, response_id, output_index, item } => ServerEventRepr::ResponseOutputItemDone { event_id: event_id.clone(), response_id: response_id.clone(), output_index: *output_index, item: item.clone() },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::trace!("Unhandled server event: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

impl ServerEvent {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        macro_rules! extract {
            ($($variant:ident),*) => {
                match self {
                    $(Self::$variant { event_id, .. } => Some(event_id.as_str()),)*
                    Self::Unknown(value) => value.get("event_id").and_then(|v| v.as_str()),
                }
            };
        }
        extract!(
            Error, SessionCreated, SessionUpdated, InputAudioBufferSpeechStarted,
            InputAudioBufferSpeechStopped, ResponseCreated, ResponseDone,
            ResponseAudioDelta, ResponseAudioDone, ResponseOutputItemDone
        )
    }

    /// Wire name of the event, e.g. `response.audio.delta`.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::InputAudioBufferSpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::InputAudioBufferSpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::ResponseCreated { .. } => "response.created",
            Self::ResponseDone { .. } => "response.done",
            Self::ResponseAudioDelta { .. } => "response.audio.delta",
            Self::ResponseAudioDone { .. } => "response.audio.done",
            Self::ResponseOutputItemDone { .. } => "response.output_item.done",
            Self::Unknown(value) => value.get("type").and_then(|v| v.as_str()).unwrap_or("unknown"),
        }
    }
}
