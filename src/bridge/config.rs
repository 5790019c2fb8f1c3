use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::audio::{REALTIME_RATE, ResampleStrategy, SilenceGate, TELEPHONY_RATE};
use crate::observer::DEFAULT_OBSERVER_QUEUE_DEPTH;
use crate::protocol::models::{
    AudioFormat, DEFAULT_MODEL, DEFAULT_VOICE, Modality, SessionUpdate, Temperature, ToolChoice,
    TurnDetection, Voice,
};
use crate::tools::ToolRegistry;
use crate::{Error, Result};

pub const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime";

/// Process-wide settings shared by every call.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    api_key: String,
    model: String,
    url: String,
    voice: Voice,
    temperature: Temperature,
    instructions: Option<String>,
    tool_choice: ToolChoice,
    turn_detection: TurnDetection,
    telephony_rate: u32,
    upstream_rate: u32,
    silence: SilenceGate,
    silence_hangover: Duration,
    max_pending_frames: usize,
    resample: ResampleStrategy,
    connect_timeout: Duration,
    auto_barge_in: bool,
    observer_queue_depth: usize,
}

impl BridgeConfig {
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub const fn telephony_rate(&self) -> u32 {
        self.telephony_rate
    }

    #[must_use]
    pub const fn upstream_rate(&self) -> u32 {
        self.upstream_rate
    }

    #[must_use]
    pub const fn silence(&self) -> SilenceGate {
        self.silence
    }

    #[must_use]
    pub const fn silence_hangover(&self) -> Duration {
        self.silence_hangover
    }

    #[must_use]
    pub const fn max_pending_frames(&self) -> usize {
        self.max_pending_frames
    }

    #[must_use]
    pub const fn resample(&self) -> &ResampleStrategy {
        &self.resample
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn auto_barge_in(&self) -> bool {
        self.auto_barge_in
    }

    #[must_use]
    pub const fn observer_queue_depth(&self) -> usize {
        self.observer_queue_depth
    }

    /// Upstream session configuration for a call running `profile`.
    ///
    /// Profile voice and instructions override the process defaults.
    #[must_use]
    pub fn session_update(&self, profile: &CallProfile) -> SessionUpdate {
        let tools = profile.tools.as_tools();
        SessionUpdate {
            turn_detection: Some(self.turn_detection.clone()),
            input_audio_format: Some(AudioFormat::Pcm16),
            output_audio_format: Some(AudioFormat::Pcm16),
            voice: Some(profile.voice.clone().unwrap_or_else(|| self.voice.clone())),
            instructions: profile.instructions.clone().or_else(|| self.instructions.clone()),
            modalities: Some(vec![Modality::Audio, Modality::Text]),
            tool_choice: (!tools.is_empty()).then(|| self.tool_choice.clone()),
            tools: (!tools.is_empty()).then_some(tools),
            temperature: Some(self.temperature),
        }
    }
}

pub struct BridgeConfigBuilder {
    api_key: Option<String>,
    model: String,
    url: String,
    voice: Voice,
    temperature: f32,
    instructions: Option<String>,
    tool_choice: ToolChoice,
    turn_detection: TurnDetection,
    telephony_rate: u32,
    upstream_rate: u32,
    silence: SilenceGate,
    silence_hangover: Duration,
    max_pending_frames: usize,
    resample: ResampleStrategy,
    connect_timeout: Duration,
    auto_barge_in: bool,
    observer_queue_depth: usize,
}

impl BridgeConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            url: DEFAULT_URL.to_string(),
            voice: Voice::from(DEFAULT_VOICE),
            temperature: Temperature::default().value(),
            instructions: None,
            tool_choice: ToolChoice::default(),
            turn_detection: TurnDetection::server_vad(),
            telephony_rate: TELEPHONY_RATE,
            upstream_rate: REALTIME_RATE,
            silence: SilenceGate::default(),
            silence_hangover: Duration::from_secs(1),
            max_pending_frames: 500,
            resample: ResampleStrategy::default(),
            connect_timeout: Duration::from_secs(10),
            auto_barge_in: true,
            observer_queue_depth: DEFAULT_OBSERVER_QUEUE_DEPTH,
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Voice::from(voice);
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    #[must_use]
    pub fn turn_detection(mut self, turn_detection: TurnDetection) -> Self {
        self.turn_detection = turn_detection;
        self
    }

    /// Telephony and upstream sample rates.
    ///
    /// The upstream session is always declared as `pcm16`, which the realtime
    /// API reads at 24 kHz, so `build` rejects any other upstream rate.
    #[must_use]
    pub const fn sample_rates(mut self, telephony: u32, upstream: u32) -> Self {
        self.telephony_rate = telephony;
        self.upstream_rate = upstream;
        self
    }

    #[must_use]
    pub const fn silence(mut self, gate: SilenceGate) -> Self {
        self.silence = gate;
        self
    }

    #[must_use]
    pub const fn silence_hangover(mut self, hangover: Duration) -> Self {
        self.silence_hangover = hangover;
        self
    }

    #[must_use]
    pub const fn max_pending_frames(mut self, frames: usize) -> Self {
        self.max_pending_frames = frames;
        self
    }

    #[must_use]
    pub fn resample(mut self, strategy: ResampleStrategy) -> Self {
        self.resample = strategy;
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn auto_barge_in(mut self, enabled: bool) -> Self {
        self.auto_barge_in = enabled;
        self
    }

    #[must_use]
    pub const fn observer_queue_depth(mut self, depth: usize) -> Self {
        self.observer_queue_depth = depth;
        self
    }

    /// # Errors
    /// Returns [`Error::Config`] for a missing API key, an out-of-range
    /// temperature, a zero sample rate or an upstream rate other than
    /// [`REALTIME_RATE`], and [`Error::Url`] for an
    /// unparseable upstream URL.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<BridgeConfig> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("api_key required".to_string()))?;
        let temperature =
            Temperature::new(self.temperature).map_err(|e| Error::Config(e.to_string()))?;
        if self.telephony_rate == 0 || self.upstream_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.upstream_rate != REALTIME_RATE {
            return Err(Error::Config(format!(
                "upstream rate must be {REALTIME_RATE} Hz for pcm16, got {}",
                self.upstream_rate
            )));
        }
        Url::parse(&self.url)?;

        Ok(BridgeConfig {
            api_key,
            model: self.model,
            url: self.url,
            voice: self.voice,
            temperature,
            instructions: self.instructions,
            tool_choice: self.tool_choice,
            turn_detection: self.turn_detection,
            telephony_rate: self.telephony_rate,
            upstream_rate: self.upstream_rate,
            silence: self.silence,
            silence_hangover: self.silence_hangover,
            max_pending_frames: self.max_pending_frames,
            resample: self.resample,
            connect_timeout: self.connect_timeout,
            auto_barge_in: self.auto_barge_in,
            observer_queue_depth: self.observer_queue_depth,
        })
    }
}

impl Default for BridgeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-flow settings (bank, debt collection, clinic, ...) layered over
/// [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct CallProfile {
    pub name: String,
    pub instructions: Option<String>,
    pub voice: Option<Voice>,
    pub tools: Arc<ToolRegistry>,
}

impl CallProfile {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            voice: None,
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(Voice::from(voice));
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }
}

impl Default for CallProfile {
    fn default() -> Self {
        Self::new("default")
    }
}
