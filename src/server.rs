//! WebSocket front door routing telephony and observer connections.
//!
//! - `/media-stream` and `/media-stream/{profile}` accept a telephony media
//!   stream and bridge it to a fresh upstream connection.
//! - `/observer?session={id or streamSid}` subscribes to a call's state.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::Result;
use crate::bridge::{BridgeConfig, CallBridge, CallProfile};
use crate::observer::ObserverBroadcaster;
use crate::session::SessionStore;
use crate::transport::{JsonSocket, RealtimeConnector, TelephonyTransport, UpstreamConnector, WsTelephony};

const MEDIA_PATH: &str = "/media-stream";
const OBSERVER_PATH: &str = "/observer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Media { profile: Option<String> },
    Observer { key: String },
}

impl Route {
    /// Resolve a request target to a route.
    ///
    /// # Errors
    /// Returns `400` for an observer request without a `session` parameter
    /// and `404` for any other path.
    pub fn parse(path: &str, query: Option<&str>) -> std::result::Result<Self, StatusCode> {
        let path = path.trim_end_matches('/');
        if path == MEDIA_PATH {
            return Ok(Self::Media { profile: None });
        }
        if let Some(name) = path.strip_prefix(MEDIA_PATH).and_then(|rest| rest.strip_prefix('/')) {
            if !name.is_empty() && !name.contains('/') {
                return Ok(Self::Media {
                    profile: Some(name.to_string()),
                });
            }
        }
        if path == OBSERVER_PATH {
            let key = query.and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(name, _)| name == "session")
                    .map(|(_, value)| value.into_owned())
            });
            return match key {
                Some(key) if !key.is_empty() => Ok(Self::Observer { key }),
                _ => Err(StatusCode::BAD_REQUEST),
            };
        }
        Err(StatusCode::NOT_FOUND)
    }
}

struct Shared {
    config: Arc<BridgeConfig>,
    profiles: HashMap<String, CallProfile>,
    default_profile: CallProfile,
    store: SessionStore,
    observers: ObserverBroadcaster,
    connector: Arc<dyn UpstreamConnector>,
}

/// Accept loop hosting any number of concurrent calls.
pub struct BridgeServer {
    shared: Shared,
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("profiles", &self.shared.profiles.keys().collect::<Vec<_>>())
            .field("sessions", &self.shared.store.len())
            .finish_non_exhaustive()
    }
}

impl BridgeServer {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        let store = SessionStore::new();
        let observers = ObserverBroadcaster::with_queue_depth(store.clone(), config.observer_queue_depth());
        Self {
            shared: Shared {
                config: Arc::new(config),
                profiles: HashMap::new(),
                default_profile: CallProfile::default(),
                store,
                observers,
                connector: Arc::new(RealtimeConnector),
            },
        }
    }

    /// Serve `profile` at `/media-stream/{profile.name}`.
    #[must_use]
    pub fn with_profile(mut self, profile: CallProfile) -> Self {
        self.shared.profiles.insert(profile.name.clone(), profile);
        self
    }

    /// Profile used at the bare `/media-stream` path.
    #[must_use]
    pub fn with_default_profile(mut self, profile: CallProfile) -> Self {
        self.shared.default_profile = profile;
        self
    }

    #[must_use]
    pub fn with_connector(mut self, connector: impl UpstreamConnector + 'static) -> Self {
        self.shared.connector = Arc::new(connector);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.shared.store
    }

    #[must_use]
    pub const fn observers(&self) -> &ObserverBroadcaster {
        &self.shared.observers
    }

    /// Accept connections until `shutdown` resolves. Calls already in
    /// progress keep running to completion.
    ///
    /// # Errors
    /// Currently infallible; accept errors are logged and skipped.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let shared = Arc::new(self.shared);
        tracing::info!(addr = ?listener.local_addr().ok(), "bridge server listening");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting calls");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move { handle_connection(shared, stream, peer).await });
                    }
                    Err(err) => tracing::warn!("accept failed: {err}"),
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let mut route = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        let resolved = Route::parse(req.uri().path(), req.uri().query()).and_then(|r| match &r {
            Route::Media { profile: Some(name) } if !shared.profiles.contains_key(name) => {
                Err(StatusCode::NOT_FOUND)
            }
            _ => Ok(r),
        });
        match resolved {
            Ok(r) => {
                route = Some(r);
                Ok(resp)
            }
            Err(status) => {
                let mut rejection = ErrorResponse::new(status.canonical_reason().map(ToString::to_string));
                *rejection.status_mut() = status;
                Err(rejection)
            }
        }
    };
    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::debug!(%peer, "handshake rejected: {err}");
            return;
        }
    };

    match route {
        Some(Route::Media { profile }) => serve_call(&shared, ws, profile).await,
        Some(Route::Observer { key }) => serve_observer(&shared, ws, key).await,
        None => {}
    }
}

async fn serve_call(shared: &Shared, ws: WebSocketStream<TcpStream>, profile: Option<String>) {
    let profile = profile
        .and_then(|name| shared.profiles.get(&name).cloned())
        .unwrap_or_else(|| shared.default_profile.clone());
    let bridge = CallBridge::new(
        Arc::clone(&shared.config),
        profile,
        shared.store.clone(),
        shared.observers.clone(),
    );
    let mut telephony = WsTelephony::new(ws);

    let upstream = match shared.connector.connect(&shared.config).await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::error!(session_id = %bridge.session_id(), kind = %err.kind(), "upstream connect failed: {err}");
            let _ = telephony.close().await;
            bridge.abandon("upstream unavailable");
            return;
        }
    };

    if let Err(err) = bridge.run(Box::new(telephony), upstream).await {
        tracing::warn!(kind = %err.kind(), "call ended with error: {err}");
    }
}

async fn serve_observer(shared: &Shared, ws: WebSocketStream<TcpStream>, key: String) {
    let mut socket = JsonSocket::new(ws, "observer");
    let mut subscription = shared.observers.subscribe(&key);
    tracing::info!(observer = subscription.id(), key = %key, "observer connected");

    loop {
        tokio::select! {
            message = subscription.recv() => {
                let Some(message) = message else {
                    tracing::debug!(observer = subscription.id(), "observer dropped from fan-out");
                    break;
                };
                if let Err(err) = socket.send_json(&message).await {
                    tracing::debug!(observer = subscription.id(), "observer send failed: {err}");
                    break;
                }
                if socket.is_closed() {
                    break;
                }
            }
            incoming = socket.next_json::<serde_json::Value>() => match incoming {
                Ok(Some(_)) => tracing::trace!("ignoring observer message"),
                Ok(None) | Err(_) => break,
            }
        }
    }
    let _ = socket.close().await;
    tracing::info!(observer = subscription.id(), "observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_media_streams() {
        assert_eq!(Route::parse("/media-stream", None), Ok(Route::Media { profile: None }));
        assert_eq!(
            Route::parse("/media-stream/bank/", None),
            Ok(Route::Media { profile: Some("bank".into()) })
        );
        assert_eq!(Route::parse("/media-stream/a/b", None), Err(StatusCode::NOT_FOUND));
    }

    #[test]
    fn routes_observers() {
        assert_eq!(
            Route::parse("/observer", Some("session=MZ%201")),
            Ok(Route::Observer { key: "MZ 1".into() })
        );
        assert_eq!(Route::parse("/observer", None), Err(StatusCode::BAD_REQUEST));
        assert_eq!(Route::parse("/observer", Some("session=")), Err(StatusCode::BAD_REQUEST));
        assert_eq!(Route::parse("/", None), Err(StatusCode::NOT_FOUND));
    }
}
