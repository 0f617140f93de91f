use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::AudioFormat;

/// Environment variable prefix; nested keys use `__` (e.g. `VOICE_BRIDGE__ENGINE__MODEL`)
pub const ENV_PREFIX: &str = "VOICE_BRIDGE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub engine: EngineConfig,
    pub session: SessionSettings,
    pub nats: NatsConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-bridge".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Caller-side rate for telephony transports
    pub telephony_sample_rate: u32,
    /// Rate of audio produced by the speech engine (also used by the browser harness)
    pub engine_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            telephony_sample_rate: AudioFormat::TELEPHONY.sample_rate,
            engine_sample_rate: AudioFormat::ENGINE.sample_rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Realtime endpoint; the model is appended as a query parameter
    pub url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub connect_timeout_ms: u64,
    /// Outbound command buffer (audio appends + control); full means backpressure
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub temperature: f32,
    pub vad_threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub transcription_model: String,
    pub transcription_language: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-4o-mini-realtime-preview-2024-12-17".to_string(),
            api_key_env: "OPENAI_KEY".to_string(),
            connect_timeout_ms: 10_000,
            command_capacity: 64,
            event_capacity: 256,
            temperature: 0.7,
            vad_threshold: 0.5,
            prefix_padding_ms: 100,
            silence_duration_ms: 200,
            transcription_model: "whisper-1".to_string(),
            transcription_language: "en".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Full endpoint URL including the model query parameter
    pub fn endpoint(&self) -> String {
        if self.model.is_empty() {
            return self.url.clone();
        }
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.url, separator, self.model)
    }
}

/// How the egress scheduler learns that a chunk finished playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAck {
    /// Wait for the caller to echo a `mark` sent after each chunk
    Mark,
    /// Complete when the caller's playback of the chunk is due to end, paced
    /// from the chunk duration
    Paced,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Window for the caller's `start` message
    pub setup_timeout_ms: u64,
    /// Commands buffered towards the egress task
    pub egress_capacity: usize,
    /// Messages buffered towards the caller transport
    pub outbound_capacity: usize,
    pub telephony_ack: PlaybackAck,
    pub browser_ack: PlaybackAck,
    /// How far ahead of the caller's playhead a paced chunk is handed over
    pub pacing_lead_ms: u64,
    pub barge_in: BargeInConfig,
    /// Upper bound for a pending booking call at session close
    pub booking_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            setup_timeout_ms: 10_000,
            egress_capacity: 256,
            outbound_capacity: 256,
            telephony_ack: PlaybackAck::Mark,
            browser_ack: PlaybackAck::Paced,
            pacing_lead_ms: 40,
            barge_in: BargeInConfig::default(),
            booking_timeout_ms: 5_000,
        }
    }
}

impl SessionSettings {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn booking_timeout(&self) -> Duration {
        Duration::from_millis(self.booking_timeout_ms)
    }

    pub fn pacing_lead(&self) -> Duration {
        Duration::from_millis(self.pacing_lead_ms)
    }
}

/// Thresholds for declaring caller speech a barge-in
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub enabled: bool,
    /// RMS on the i16 scale at or above which a frame counts as voiced
    pub energy_threshold: f64,
    /// Consecutive voiced audio required before interrupting
    pub min_speech_ms: u64,
    /// Treat the engine's server-side `speech_started` as a barge-in
    pub honor_engine_vad: bool,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 500.0,
            min_speech_ms: 120,
            honor_engine_vad: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// When unset, collaborators are served locally from `assistant`
    pub url: Option<String>,
    pub descriptor_subject: String,
    pub booking_subject: String,
    pub message_subject: String,
    pub analytics_subject: String,
    pub request_timeout_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: None,
            descriptor_subject: "bridge.descriptor.lookup".to_string(),
            booking_subject: "bridge.booking.submit".to_string(),
            message_subject: "bridge.conversation.message".to_string(),
            analytics_subject: "bridge.analytics.session".to_string(),
            request_timeout_ms: 3_000,
        }
    }
}

/// Fallback assistant used when no external descriptor service is configured
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub assistant_ref: String,
    pub name: String,
    pub instructions: String,
    pub voice_type: String,
    pub greeting: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            assistant_ref: "local-assistant".to_string(),
            name: "Assistant".to_string(),
            instructions: "You are a warm, conversational voice assistant. Keep responses brief."
                .to_string(),
            voice_type: "female".to_string(),
            greeting: None,
        }
    }
}

impl Config {
    /// Load from an optional file plus `VOICE_BRIDGE__*` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to deserialize config")
    }
}
