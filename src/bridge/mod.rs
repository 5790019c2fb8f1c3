//! Per-call orchestration between the telephony and realtime legs.

mod config;

pub use config::{BridgeConfig, BridgeConfigBuilder, CallProfile, DEFAULT_URL};

use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;

use crate::Result;
use crate::audio::{Resampler, codec};
use crate::observer::ObserverBroadcaster;
use crate::protocol::models::Item;
use crate::protocol::telephony::{MediaPayload, StreamStart};
use crate::protocol::{ClientEvent, ServerEvent, TelephonyCommand, TelephonyEvent};
use crate::session::{SessionStatus, SessionStore};
use crate::tools::{ToolCall, ToolDispatcher, ToolResult};
use crate::transport::{TelephonyTransport, UpstreamTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Waiting for the telephony stream to start.
    Connecting,
    Streaming,
    Closing,
    Closed,
}

enum Flow {
    Continue,
    Close(&'static str),
}

/// Pairs one telephony media stream with one realtime model connection.
///
/// The bridge owns its session in the [`SessionStore`] from construction
/// until it closes; closing removes the session and pushes a final
/// `closed` snapshot to observers.
pub struct CallBridge {
    session_id: String,
    config: Arc<BridgeConfig>,
    profile: CallProfile,
    store: SessionStore,
    observers: ObserverBroadcaster,
    dispatcher: ToolDispatcher,
    resampler: Resampler,
    state: BridgeState,
    stream_sid: Option<String>,
    upstream_ready: bool,
    pending_audio: VecDeque<String>,
    pending_overflowed: bool,
    last_voiced: Option<Instant>,
    active_response: Option<String>,
    cancelled_response: Option<String>,
    tool_calls: JoinSet<ToolResult>,
}

impl std::fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBridge")
            .field("session_id", &self.session_id)
            .field("profile", &self.profile.name)
            .field("state", &self.state)
            .field("stream_sid", &self.stream_sid)
            .finish_non_exhaustive()
    }
}

impl CallBridge {
    /// Register a new `connecting` session for an accepted telephony
    /// connection.
    #[must_use]
    pub fn new(
        config: Arc<BridgeConfig>,
        profile: CallProfile,
        store: SessionStore,
        observers: ObserverBroadcaster,
    ) -> Self {
        let session_id = store.create();
        let dispatcher = ToolDispatcher::new(Arc::clone(&profile.tools), store.clone())
            .with_observers(observers.clone());
        let resampler = Resampler::new(config.resample().clone(), config.silence());
        tracing::debug!(session_id = %session_id, profile = %profile.name, "call session created");
        Self {
            session_id,
            config,
            profile,
            store,
            observers,
            dispatcher,
            resampler,
            state: BridgeState::Connecting,
            stream_sid: None,
            upstream_ready: false,
            pending_audio: VecDeque::new(),
            pending_overflowed: false,
            last_voiced: None,
            active_response: None,
            cancelled_response: None,
            tool_calls: JoinSet::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub const fn state(&self) -> BridgeState {
        self.state
    }

    /// Relay between both legs until either one ends.
    ///
    /// # Errors
    /// Returns an error only if the upstream session could not be
    /// configured. Failures after that close the call and return `Ok`.
    pub async fn run(
        mut self,
        mut telephony: Box<dyn TelephonyTransport>,
        mut upstream: Box<dyn UpstreamTransport>,
    ) -> Result<()> {
        let span = tracing::info_span!("call", session_id = %self.session_id, profile = %self.profile.name);
        async move { self.drive(telephony.as_mut(), upstream.as_mut()).await }
            .instrument(span)
            .await
    }

    /// Give up on a call whose upstream leg never came up.
    pub fn abandon(mut self, reason: &str) {
        tracing::warn!(session_id = %self.session_id, reason, "abandoning call");
        self.finish();
    }

    async fn drive(
        &mut self,
        telephony: &mut dyn TelephonyTransport,
        upstream: &mut dyn UpstreamTransport,
    ) -> Result<()> {
        tracing::info!("call bridge started");
        let update = ClientEvent::session_update(self.config.session_update(&self.profile));
        if let Err(err) = upstream.send(update).await {
            tracing::warn!(kind = %err.kind(), "failed to configure upstream session: {err}");
            self.close(telephony, upstream, "upstream configuration failed").await;
            return Err(err);
        }

        loop {
            let flow = tokio::select! {
                event = telephony.next_event() => self.on_telephony(event, upstream).await,
                event = upstream.next_event() => self.on_upstream(event, telephony, upstream).await,
                Some(joined) = self.tool_calls.join_next(), if !self.tool_calls.is_empty() => {
                    self.on_tool_result(joined, upstream).await
                }
            };
            if let Flow::Close(reason) = flow {
                self.close(telephony, upstream, reason).await;
                return Ok(());
            }
        }
    }

    async fn on_telephony(
        &mut self,
        event: Result<Option<TelephonyEvent>>,
        upstream: &mut dyn UpstreamTransport,
    ) -> Flow {
        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => return Flow::Close("telephony leg closed"),
            Err(err) => {
                tracing::warn!(kind = %err.kind(), "telephony leg failed: {err}");
                return Flow::Close("telephony leg failed");
            }
        };
        match event {
            TelephonyEvent::Connected { protocol, .. } => {
                tracing::debug!(?protocol, "telephony connected");
                Flow::Continue
            }
            TelephonyEvent::Start { start, .. } => self.on_stream_start(start),
            TelephonyEvent::Media { media, .. } => self.on_caller_audio(&media, upstream).await,
            TelephonyEvent::Mark { mark, .. } => {
                tracing::debug!(mark = %mark.name, "playback mark reached");
                Flow::Continue
            }
            TelephonyEvent::Stop { .. } => Flow::Close("telephony stream stopped"),
        }
    }

    fn on_stream_start(&mut self, start: StreamStart) -> Flow {
        if let Some(existing) = &self.stream_sid {
            tracing::warn!(stream_sid = %existing, repeated = %start.stream_sid, "ignoring repeated stream start");
            return Flow::Continue;
        }
        tracing::info!(stream_sid = %start.stream_sid, call_sid = ?start.call_sid, "telephony stream started");
        self.store.attach_stream(&self.session_id, &start.stream_sid);
        self.stream_sid = Some(start.stream_sid);
        self.transition(BridgeState::Streaming);
        Flow::Continue
    }

    async fn on_caller_audio(&mut self, media: &MediaPayload, upstream: &mut dyn UpstreamTransport) -> Flow {
        if self.state != BridgeState::Streaming {
            tracing::trace!("dropping caller audio received before stream start");
            return Flow::Continue;
        }
        let mulaw = match media.decode() {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return Flow::Continue,
            Err(err) => {
                tracing::warn!("dropping caller frame: {err}");
                return Flow::Continue;
            }
        };
        let pcm = codec::decode(&mulaw);

        let now = Instant::now();
        if self.resampler.gate().is_silent(&pcm) {
            let hangover = self.config.silence_hangover();
            let in_hangover = self
                .last_voiced
                .is_some_and(|voiced| now.duration_since(voiced) <= hangover);
            if !in_hangover {
                tracing::trace!("suppressing silent caller frame");
                return Flow::Continue;
            }
        } else {
            self.last_voiced = Some(now);
        }

        let pcm = match self
            .resampler
            .resample(&pcm, self.config.telephony_rate(), self.config.upstream_rate())
            .await
        {
            Ok(pcm) if !pcm.is_empty() => pcm,
            Ok(_) => return Flow::Continue,
            Err(err) => {
                tracing::warn!(kind = %err.kind(), "dropping caller frame: {err}");
                return Flow::Continue;
            }
        };
        let audio = general_purpose::STANDARD.encode(&pcm);

        if self.upstream_ready {
            forward_upstream(upstream, ClientEvent::audio_append(audio)).await
        } else {
            self.buffer_audio(audio);
            Flow::Continue
        }
    }

    fn buffer_audio(&mut self, audio: String) {
        let limit = self.config.max_pending_frames();
        if limit == 0 {
            tracing::debug!("upstream not ready, dropping caller frame");
            return;
        }
        while self.pending_audio.len() >= limit {
            self.pending_audio.pop_front();
            if !self.pending_overflowed {
                self.pending_overflowed = true;
                tracing::warn!(limit, "upstream not ready, dropping oldest buffered caller audio");
            }
        }
        self.pending_audio.push_back(audio);
    }

    async fn on_upstream(
        &mut self,
        event: Result<Option<ServerEvent>>,
        telephony: &mut dyn TelephonyTransport,
        upstream: &mut dyn UpstreamTransport,
    ) -> Flow {
        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => return Flow::Close("upstream leg closed"),
            Err(err) => {
                tracing::warn!(kind = %err.kind(), "upstream leg failed: {err}");
                return Flow::Close("upstream leg failed");
            }
        };
        match event {
            ServerEvent::SessionCreated { session, .. } => {
                tracing::debug!(upstream_session = ?session.id, model = ?session.model, "upstream session created");
                Flow::Continue
            }
            ServerEvent::SessionUpdated { .. } => self.on_upstream_ready(upstream).await,
            ServerEvent::Error { error, .. } => {
                tracing::warn!(error_type = ?error.error_type, code = ?error.code, "upstream error: {}", error.message);
                Flow::Continue
            }
            ServerEvent::InputAudioBufferSpeechStarted { .. } => self.on_speech_started(telephony, upstream).await,
            ServerEvent::InputAudioBufferSpeechStopped { .. } => {
                tracing::debug!("caller stopped speaking");
                Flow::Continue
            }
            ServerEvent::ResponseCreated { response, .. } => {
                tracing::debug!(response_id = %response.id, "response started");
                self.active_response = Some(response.id);
                Flow::Continue
            }
            ServerEvent::ResponseDone { response, .. } => {
                tracing::debug!(response_id = %response.id, status = ?response.status, "response done");
                if self.active_response.as_deref() == Some(response.id.as_str()) {
                    self.active_response = None;
                }
                Flow::Continue
            }
            ServerEvent::ResponseAudioDelta { response_id, delta, .. } => {
                self.on_model_audio(&response_id, &delta, telephony).await
            }
            ServerEvent::ResponseAudioDone { .. } => Flow::Continue,
            ServerEvent::ResponseOutputItemDone { item, .. } => {
                self.on_output_item(&item);
                Flow::Continue
            }
            other @ ServerEvent::Unknown(_) => {
                tracing::trace!(event_type = other.event_type(), "ignoring upstream event");
                Flow::Continue
            }
        }
    }

    async fn on_upstream_ready(&mut self, upstream: &mut dyn UpstreamTransport) -> Flow {
        if self.upstream_ready {
            tracing::debug!("upstream session reconfigured");
            return Flow::Continue;
        }
        self.upstream_ready = true;
        let buffered = self.pending_audio.len();
        tracing::info!(buffered, "upstream session ready");
        while let Some(audio) = self.pending_audio.pop_front() {
            if let Flow::Close(reason) = forward_upstream(upstream, ClientEvent::audio_append(audio)).await {
                return Flow::Close(reason);
            }
        }
        Flow::Continue
    }

    async fn on_speech_started(
        &mut self,
        telephony: &mut dyn TelephonyTransport,
        upstream: &mut dyn UpstreamTransport,
    ) -> Flow {
        tracing::debug!("caller started speaking");
        if !self.config.auto_barge_in() {
            return Flow::Continue;
        }
        let Some(response_id) = self.active_response.take() else {
            return Flow::Continue;
        };
        tracing::info!(response_id = %response_id, "caller barged in, cancelling response");
        if let Some(stream_sid) = &self.stream_sid {
            if let Flow::Close(reason) = forward_telephony(telephony, TelephonyCommand::clear(stream_sid.clone())).await {
                return Flow::Close(reason);
            }
        }
        let cancel = ClientEvent::ResponseCancel {
            event_id: None,
            response_id: Some(response_id.clone()),
        };
        self.cancelled_response = Some(response_id);
        forward_upstream(upstream, cancel).await
    }

    async fn on_model_audio(&self, response_id: &str, delta: &str, telephony: &mut dyn TelephonyTransport) -> Flow {
        if self.cancelled_response.as_deref() == Some(response_id) {
            tracing::trace!(response_id, "dropping audio from cancelled response");
            return Flow::Continue;
        }
        let Some(stream_sid) = self.stream_sid.clone() else {
            tracing::debug!("dropping model audio before stream start");
            return Flow::Continue;
        };
        let pcm = match general_purpose::STANDARD.decode(delta) {
            Ok(pcm) => pcm,
            Err(err) => {
                tracing::warn!("dropping model audio, bad base64: {err}");
                return Flow::Continue;
            }
        };
        let converted = self
            .resampler
            .resample(&pcm, self.config.upstream_rate(), self.config.telephony_rate())
            .await
            .and_then(|pcm| codec::encode(&pcm));
        let mulaw = match converted {
            Ok(mulaw) if !mulaw.is_empty() => mulaw,
            Ok(_) => return Flow::Continue,
            Err(err) => {
                tracing::warn!(kind = %err.kind(), "dropping model audio: {err}");
                return Flow::Continue;
            }
        };
        forward_telephony(telephony, TelephonyCommand::media(stream_sid, &mulaw)).await
    }

    fn on_output_item(&mut self, item: &Item) {
        let Some(call) = ToolCall::from_item(item) else {
            tracing::trace!(item = %item, "ignoring finished output item");
            return;
        };
        tracing::info!(call_id = %call.call_id, tool = %call.name, "model requested tool");
        let dispatcher = self.dispatcher.clone();
        let session_id = self.session_id.clone();
        self.tool_calls
            .spawn(async move { dispatcher.dispatch(&session_id, call).await }.in_current_span());
    }

    async fn on_tool_result(
        &mut self,
        joined: std::result::Result<ToolResult, JoinError>,
        upstream: &mut dyn UpstreamTransport,
    ) -> Flow {
        let result = match joined {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("tool dispatch task ended without a result: {err}");
                return self.release_continuation(upstream).await;
            }
        };
        tracing::info!(call_id = %result.call_id, tool = %result.name, success = result.is_success(), "tool call finished");
        if let Flow::Close(reason) = forward_upstream(upstream, result.output_event()).await {
            return Flow::Close(reason);
        }
        self.release_continuation(upstream).await
    }

    /// Ask the model to continue once no tool call of this turn is outstanding.
    async fn release_continuation(&self, upstream: &mut dyn UpstreamTransport) -> Flow {
        if self.tool_calls.is_empty() {
            forward_upstream(upstream, ClientEvent::response_create()).await
        } else {
            tracing::debug!(outstanding = self.tool_calls.len(), "holding continuation for outstanding tool calls");
            Flow::Continue
        }
    }

    fn transition(&mut self, next: BridgeState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?next, "bridge state change");
        self.state = next;
        let status = match next {
            BridgeState::Connecting => SessionStatus::Connecting,
            BridgeState::Streaming => SessionStatus::Active,
            BridgeState::Closing => SessionStatus::Closing,
            BridgeState::Closed => SessionStatus::Closed,
        };
        if self.store.set_status(&self.session_id, status) {
            self.observers.notify(&self.session_id);
        }
    }

    async fn close(
        &mut self,
        telephony: &mut dyn TelephonyTransport,
        upstream: &mut dyn UpstreamTransport,
        reason: &str,
    ) {
        if matches!(self.state, BridgeState::Closing | BridgeState::Closed) {
            return;
        }
        tracing::info!(reason, "closing call");
        self.transition(BridgeState::Closing);
        self.tool_calls.abort_all();
        if let Err(err) = telephony.close().await {
            tracing::debug!("telephony close failed: {err}");
        }
        if let Err(err) = upstream.close().await {
            tracing::debug!("upstream close failed: {err}");
        }
        self.finish();
        tracing::info!("call closed");
    }

    fn finish(&mut self) {
        self.pending_audio.clear();
        self.tool_calls.abort_all();
        if let Some(mut session) = self.store.remove(&self.session_id) {
            session.status = SessionStatus::Closed;
            self.observers.publish_snapshot(&session);
        }
        self.state = BridgeState::Closed;
    }
}

async fn forward_upstream(upstream: &mut dyn UpstreamTransport, event: ClientEvent) -> Flow {
    match upstream.send(event).await {
        Ok(()) => Flow::Continue,
        Err(err) => {
            tracing::warn!(kind = %err.kind(), "upstream send failed: {err}");
            Flow::Close("upstream send failed")
        }
    }
}

async fn forward_telephony(telephony: &mut dyn TelephonyTransport, command: TelephonyCommand) -> Flow {
    match telephony.send(command).await {
        Ok(()) => Flow::Continue,
        Err(err) => {
            tracing::warn!(kind = %err.kind(), "telephony send failed: {err}");
            Flow::Close("telephony send failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxFuture;

    #[derive(Default)]
    struct RecordingUpstream {
        sent: Vec<ClientEvent>,
    }

    impl UpstreamTransport for RecordingUpstream {
        fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<()>> {
            self.sent.push(event);
            Box::pin(async { Ok(()) })
        }

        fn next_event(&mut self) -> BoxFuture<'_, Result<Option<ServerEvent>>> {
            Box::pin(std::future::pending())
        }

        fn close(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn bridge() -> CallBridge {
        let config = BridgeConfig::builder().api_key("sk-test").build().unwrap();
        let store = SessionStore::new();
        let observers = ObserverBroadcaster::new(store.clone());
        CallBridge::new(Arc::new(config), CallProfile::default(), store, observers)
    }

    #[tokio::test]
    async fn lost_dispatch_task_still_releases_continuation() {
        let mut bridge = bridge();
        let mut upstream = RecordingUpstream::default();
        bridge.tool_calls.spawn(std::future::pending::<ToolResult>());
        bridge.tool_calls.abort_all();

        let joined = bridge.tool_calls.join_next().await.unwrap();
        assert!(joined.is_err());
        assert!(matches!(bridge.on_tool_result(joined, &mut upstream).await, Flow::Continue));
        assert_eq!(upstream.sent, vec![ClientEvent::response_create()]);
    }

    #[tokio::test]
    async fn lost_dispatch_task_waits_for_outstanding_calls() {
        let mut bridge = bridge();
        let mut upstream = RecordingUpstream::default();
        let lost = bridge.tool_calls.spawn(std::future::pending::<ToolResult>());
        bridge.tool_calls.spawn(std::future::pending::<ToolResult>());
        lost.abort();

        let joined = bridge.tool_calls.join_next().await.unwrap();
        assert!(joined.is_err());
        bridge.on_tool_result(joined, &mut upstream).await;
        assert!(upstream.sent.is_empty());
        bridge.tool_calls.abort_all();
    }
}
