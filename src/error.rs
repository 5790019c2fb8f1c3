use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Error payload carried by an upstream `error` event.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

/// Coarse classification used in logs and in failed tool-call payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    Codec,
    ToolValidation,
    ToolExecution,
    Resample,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Codec => "codec",
            Self::ToolValidation => "tool_validation",
            Self::ToolExecution => "tool_execution",
            Self::Resample => "resample",
            Self::Config => "config",
        };
        write!(f, "{label}")
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Realtime API error: {0:?}")]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Connection attempt timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Audio codec error: {0}")]
    Codec(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Unknown function: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    ToolValidation(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::WebSocket(_) | Self::Io(_) | Self::ConnectionClosed | Self::Timeout | Self::Api(_) => {
                ErrorKind::Transport
            }
            Self::Serialization(_) | Self::Protocol(_) => ErrorKind::Protocol,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Resample(_) => ErrorKind::Resample,
            Self::UnknownTool(_) | Self::ToolValidation(_) => ErrorKind::ToolValidation,
            Self::ToolExecution(_) => ErrorKind::ToolExecution,
            Self::Url(_) | Self::Header(_) | Self::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(Error::Codec("odd".into()).kind(), ErrorKind::Codec);
        assert_eq!(Error::UnknownTool("x".into()).kind(), ErrorKind::ToolValidation);
        assert_eq!(Error::ToolExecution("boom".into()).kind(), ErrorKind::ToolExecution);
        assert_eq!(ErrorKind::ToolValidation.to_string(), "tool_validation");
    }
}
