use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";
pub const DEFAULT_VOICE: &str = "alloy";

/// JSON Schema / tool parameter definitions are intentionally untyped.
pub type JsonSchema = Value;

/// Free-form JSON payloads where the protocol is open-ended.
pub type ArbitraryJson = Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Eagerness {
    Auto,
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Voice {
    Id(String),
    Object { id: String },
}

impl<S: Into<String>> From<S> for Voice {
    fn from(s: S) -> Self {
        Self::Id(s.into())
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) | Self::Object { id } => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// # Errors
    /// Returns an error if `val` is outside the inclusive range [0.0, 2.0].
    pub fn new(val: f32) -> Result<Self, TemperatureError> {
        if (0.0..=2.0).contains(&val) {
            Ok(Self(val))
        } else {
            Err(TemperatureError { value: val })
        }
    }

    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self(0.8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureError {
    pub value: f32,
}

impl std::fmt::Display for TemperatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "temperature must be between 0.0 and 2.0, got {}",
            self.value
        )
    }
}

impl std::error::Error for TemperatureError {}

impl TryFrom<f32> for Temperature {
    type Error = TemperatureError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Temperature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f32::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}
