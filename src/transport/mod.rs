//! Socket plumbing for both legs of a call.
//!
//! The bridge only sees the [`UpstreamTransport`] and [`TelephonyTransport`]
//! traits, so tests can drive it with channel-backed mocks.

pub mod socket;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use crate::Result;
use crate::bridge::BridgeConfig;
use crate::protocol::{ClientEvent, ServerEvent, TelephonyCommand, TelephonyEvent};

pub use socket::{JsonSocket, WsTelephony};
pub use ws::{RealtimeConnector, WsUpstream, connect};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Realtime model leg.
pub trait UpstreamTransport: Send {
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>>;
    /// `Ok(None)` once the connection is closed.
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Telephony media-stream leg.
pub trait TelephonyTransport: Send {
    fn send(&mut self, command: TelephonyCommand) -> BoxFuture<'_, Result<()>>;
    /// `Ok(None)` once the connection is closed.
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<TelephonyEvent>>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Opens upstream connections for new calls.
pub trait UpstreamConnector: Send + Sync {
    fn connect<'a>(&'a self, config: &'a BridgeConfig) -> BoxFuture<'a, Result<Box<dyn UpstreamTransport>>>;
}
