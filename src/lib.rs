#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Bridge telephony media streams (8 kHz µ-law over WebSocket) to a realtime
//! speech model (24 kHz PCM16 over WebSocket), dispatching the model's
//! function calls to registered tools and fanning session state out to
//! observer clients.

pub mod audio;
pub mod bridge;
pub mod error;
pub mod observer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use audio::{Resampler, SilenceGate};
pub use bridge::{BridgeConfig, BridgeConfigBuilder, BridgeState, CallBridge, CallProfile};
pub use error::{Error, ErrorKind, Result};
pub use observer::{ObserverBroadcaster, ObserverSubscription};
pub use protocol::{ClientEvent, ObserverMessage, ServerEvent, TelephonyCommand, TelephonyEvent};
pub use server::BridgeServer;
pub use session::{CallSession, PendingAction, SessionStatus, SessionStore};
pub use tools::{ToolCall, ToolContext, ToolDispatcher, ToolOutput, ToolRegistry, ToolResult};
pub use transport::{TelephonyTransport, UpstreamConnector, UpstreamTransport};

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "µµµµ";
        let out = safe_truncate(s, 3);
        assert!(out.starts_with('µ'));
        assert!(out.ends_with("6 bytes"));
        assert_eq!(safe_truncate("short", 10), "short");
    }
}
