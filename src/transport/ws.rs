use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::socket::JsonSocket;
use super::{BoxFuture, UpstreamConnector, UpstreamTransport};
use crate::bridge::BridgeConfig;
use crate::error::{Error, Result};
use crate::protocol::{ClientEvent, ServerEvent};

/// Client side of the realtime model connection.
#[derive(Debug)]
pub struct WsUpstream<S>(JsonSocket<S>);

impl<S> WsUpstream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub const fn new(stream: WebSocketStream<S>) -> Self {
        Self(JsonSocket::new(stream, "upstream"))
    }
}

impl<S> UpstreamTransport for WsUpstream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.0.send_json(&event).await })
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
        Box::pin(async move { self.0.next_json().await })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.0.close().await })
    }
}

/// Establish a WebSocket connection to the realtime API.
///
/// # Errors
/// Returns an error if the URL or key is invalid, the handshake fails, or
/// the connect timeout elapses.
pub async fn connect(config: &BridgeConfig) -> Result<WsUpstream<MaybeTlsStream<TcpStream>>> {
    let mut url = Url::parse(config.url())?;
    url.query_pairs_mut().append_pair("model", config.model());

    let auth_header = HeaderValue::from_str(&format!("Bearer {}", config.api_key()))?;

    let mut req = url.as_str().into_client_request()?;
    let h = req.headers_mut();
    h.insert(AUTHORIZATION, auth_header);
    h.insert("openai-beta", HeaderValue::from_static("realtime=v1"));

    let (ws_stream, _) = tokio::time::timeout(config.connect_timeout(), connect_async(req))
        .await
        .map_err(|_| Error::Timeout)??;

    tracing::info!(model = config.model(), "Connected to realtime upstream");

    Ok(WsUpstream::new(ws_stream))
}

/// Connects each call to the configured realtime endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealtimeConnector;

impl UpstreamConnector for RealtimeConnector {
    fn connect<'a>(&'a self, config: &'a BridgeConfig) -> BoxFuture<'a, Result<Box<dyn UpstreamTransport>>> {
        Box::pin(async move {
            let upstream = connect(config).await?;
            Ok(Box::new(upstream) as Box<dyn UpstreamTransport>)
        })
    }
}
