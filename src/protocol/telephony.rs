//! Media-stream events exchanged with the telephony provider.

use base64::Engine as _;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Inbound events on the telephony leg.
///
/// Unrecognised `event` values fail to deserialize and are dropped by the
/// socket adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "sequenceNumber", default, skip_serializing_if = "Option::is_none")]
        sequence_number: Option<String>,
        start: StreamStart,
    },
    Media {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        mark: MarkLabel,
    },
    Stop {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
    #[serde(rename = "accountSid", default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    /// Parameters attached to the stream by the call flow that opened it.
    #[serde(rename = "customParameters", default, skip_serializing_if = "Map::is_empty")]
    pub custom_parameters: Map<String, Value>,
    #[serde(rename = "mediaFormat", default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
}

const fn default_channels() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPayload {
    /// Base64-encoded µ-law audio.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl MediaPayload {
    #[must_use]
    pub fn new(mulaw: &[u8]) -> Self {
        Self {
            payload: general_purpose::STANDARD.encode(mulaw),
            track: None,
            chunk: None,
            timestamp: None,
        }
    }

    /// # Errors
    /// Returns [`Error::Codec`] if the payload is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| Error::Codec(format!("media payload is not base64: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkLabel {
    pub name: String,
}

/// Outbound commands on the telephony leg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Discard audio queued for playback to the caller.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMedia {
    pub payload: String,
}

impl TelephonyCommand {
    /// Media frame carrying µ-law bytes, base64-encoded for the wire.
    #[must_use]
    pub fn media(stream_sid: impl Into<String>, mulaw: &[u8]) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: general_purpose::STANDARD.encode(mulaw),
            },
        }
    }

    #[must_use]
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    #[must_use]
    pub fn stream_sid(&self) -> &str {
        match self {
            Self::Media { stream_sid, .. } | Self::Clear { stream_sid } | Self::Mark { stream_sid, .. } => {
                stream_sid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_provider_start_frame() {
        let raw = json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC1",
                "streamSid": "MZ1",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": { "flow": "bank" },
                "mediaFormat": { "encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1 }
            },
            "streamSid": "MZ1"
        });
        let event: TelephonyEvent = serde_json::from_value(raw).unwrap();
        match event {
            TelephonyEvent::Start { start, .. } => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid.as_deref(), Some("CA1"));
                assert_eq!(start.custom_parameters["flow"], "bank");
                assert_eq!(start.media_format.unwrap().sample_rate, 8_000);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event() {
        let raw = json!({ "event": "dtmf", "dtmf": { "digit": "1" } });
        assert!(serde_json::from_value::<TelephonyEvent>(raw).is_err());
    }

    #[test]
    fn media_payload_rejects_bad_base64() {
        let media = MediaPayload {
            payload: "***".to_string(),
            track: None,
            chunk: None,
            timestamp: None,
        };
        assert!(matches!(media.decode(), Err(Error::Codec(_))));
    }

    #[test]
    fn outbound_media_shape() {
        let cmd = TelephonyCommand::media("SS1", &[0xFF, 0xFF]);
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({ "event": "media", "streamSid": "SS1", "media": { "payload": "//8=" } })
        );
        assert_eq!(
            serde_json::to_value(TelephonyCommand::clear("SS1")).unwrap(),
            json!({ "event": "clear", "streamSid": "SS1" })
        );
    }
}
