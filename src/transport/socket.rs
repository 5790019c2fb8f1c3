use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;

use super::{BoxFuture, TelephonyTransport};
use crate::protocol::{TelephonyCommand, TelephonyEvent};
use crate::{Result, TRACE_LOG_MAX_BYTES, safe_truncate};

/// WebSocket carrying one JSON document per text frame.
///
/// Sends on a closed socket are silently skipped and malformed frames are
/// logged and dropped, so a misbehaving peer never takes the call down.
#[derive(Debug)]
pub struct JsonSocket<S> {
    stream: WebSocketStream<S>,
    label: &'static str,
    closed: bool,
}

impl<S> JsonSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub const fn new(stream: WebSocketStream<S>, label: &'static str) -> Self {
        Self {
            stream,
            label,
            closed: false,
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// # Errors
    /// Returns an error if serialization fails or the socket errors while
    /// open. Sending after close is a no-op.
    pub async fn send_json<T: Serialize + Sync>(&mut self, value: &T) -> Result<()> {
        if self.closed {
            tracing::debug!(leg = self.label, "socket closed, skipping send");
            return Ok(());
        }
        let json = serde_json::to_string(value)?;
        tracing::trace!(leg = self.label, "Sending: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        match self.stream.send(Message::Text(json.into())).await {
            Ok(()) => Ok(()),
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                self.closed = true;
                Ok(())
            }
            Err(err) => {
                self.closed = true;
                Err(err.into())
            }
        }
    }

    /// Next well-formed message, or `None` once the peer has gone.
    ///
    /// # Errors
    /// Returns an error if the underlying socket fails.
    pub async fn next_json<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        if self.closed {
            return Ok(None);
        }
        while let Some(msg) = self.stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(err) => {
                    self.closed = true;
                    return Err(err.into());
                }
            };
            match msg {
                Message::Text(text) => {
                    tracing::trace!(leg = self.label, "Received: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                    match serde_json::from_str::<T>(&text) {
                        Ok(value) => return Ok(Some(value)),
                        Err(err) => {
                            tracing::warn!(leg = self.label, "dropping malformed message: {err}");
                        }
                    }
                }
                Message::Close(frame) => {
                    tracing::info!(leg = self.label, ?frame, "peer closed the connection");
                    break;
                }
                Message::Ping(payload) => {
                    tracing::debug!(leg = self.label, "Received Ping, sending Pong");
                    let _ = self.stream.send(Message::Pong(payload)).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(leg = self.label, "ignoring binary frame");
                }
                _ => (),
            }
        }
        self.closed = true;
        Ok(None)
    }

    /// Close the socket. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the close handshake fails on an open socket.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Server-side telephony media stream.
#[derive(Debug)]
pub struct WsTelephony<S>(JsonSocket<S>);

impl<S> WsTelephony<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub const fn new(stream: WebSocketStream<S>) -> Self {
        Self(JsonSocket::new(stream, "telephony"))
    }
}

impl<S> TelephonyTransport for WsTelephony<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, command: TelephonyCommand) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.0.send_json(&command).await })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<TelephonyEvent>>> {
        Box::pin(async move { self.0.next_json().await })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.0.close().await })
    }
}
