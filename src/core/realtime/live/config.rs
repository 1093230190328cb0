//! Live session configuration types.
//!
//! This module contains the connection-level configuration for the Live
//! bidirectional streaming API:
//! - Endpoint, model and voice selection
//! - Activity detection (speech start/end) tuning
//! - Handshake timeout, retry delays and the proactive reconnect schedule

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live API WebSocket endpoint.
pub const LIVE_WEBSOCKET_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model when the credential provider does not pin one.
pub const LIVE_DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice.
pub const LIVE_DEFAULT_VOICE: &str = "Puck";

/// Microphone audio sample rate expected by the Live API.
pub const LIVE_INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the audio produced by the model.
pub const LIVE_OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Server-side ceiling on a single connection's lifetime.
pub const LIVE_CONNECTION_CEILING_SECS: u64 = 600;

// =============================================================================
// Activity Detection
// =============================================================================

/// Sensitivity of the server-side voice activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Detect speech boundaries eagerly
    #[default]
    High,
    /// Require stronger evidence before switching
    Low,
}

impl Sensitivity {
    /// Wire value for `startOfSpeechSensitivity`.
    #[inline]
    pub fn start_value(&self) -> &'static str {
        match self {
            Self::High => "START_SENSITIVITY_HIGH",
            Self::Low => "START_SENSITIVITY_LOW",
        }
    }

    /// Wire value for `endOfSpeechSensitivity`.
    #[inline]
    pub fn end_value(&self) -> &'static str {
        match self {
            Self::High => "END_SENSITIVITY_HIGH",
            Self::Low => "END_SENSITIVITY_LOW",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Self::Low,
            _ => Self::High,
        }
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// Configuration for one Live connection manager.
///
/// Timing values are plain milliseconds so they can be written directly in
/// YAML. The connection ceiling and the reconnect fraction are provider
/// specific; both are overridable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// WebSocket URL (defaults to the production endpoint).
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    /// Model used when the credential provider returns none.
    #[serde(default = "default_model")]
    pub model: String,

    /// Prebuilt voice name.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// System instruction for the interviewer persona.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    /// Start-of-speech sensitivity.
    #[serde(default)]
    pub start_of_speech_sensitivity: Sensitivity,

    /// End-of-speech sensitivity.
    #[serde(default)]
    pub end_of_speech_sensitivity: Sensitivity,

    /// Audio kept before detected speech start.
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,

    /// Silence required before the server ends the candidate's turn.
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,

    /// Microphone sample rate.
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,

    /// Handshake deadline, covering credential fetch, socket open and setup ack.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay before the single fresh-connect retry.
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Delay before reconnecting with a resumption token.
    #[serde(default = "default_resume_retry_delay_ms")]
    pub resume_retry_delay_ms: u64,

    /// Known server ceiling on a connection's lifetime.
    #[serde(default = "default_connection_ceiling_secs")]
    pub connection_ceiling_secs: u64,

    /// Fraction of the ceiling after which the client rotates the connection.
    #[serde(default = "default_proactive_reconnect_fraction")]
    pub proactive_reconnect_fraction: f64,
}

fn default_websocket_url() -> String {
    LIVE_WEBSOCKET_URL.to_string()
}

fn default_model() -> String {
    LIVE_DEFAULT_MODEL.to_string()
}

fn default_voice() -> String {
    LIVE_DEFAULT_VOICE.to_string()
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    1000
}

fn default_input_sample_rate() -> u32 {
    LIVE_INPUT_SAMPLE_RATE
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_initial_retry_delay_ms() -> u64 {
    2_000
}

fn default_resume_retry_delay_ms() -> u64 {
    1_000
}

fn default_connection_ceiling_secs() -> u64 {
    LIVE_CONNECTION_CEILING_SECS
}

fn default_proactive_reconnect_fraction() -> f64 {
    0.9
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            websocket_url: default_websocket_url(),
            model: default_model(),
            voice: default_voice(),
            system_instruction: None,
            start_of_speech_sensitivity: Sensitivity::default(),
            end_of_speech_sensitivity: Sensitivity::default(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
            input_sample_rate: default_input_sample_rate(),
            connect_timeout_ms: default_connect_timeout_ms(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            resume_retry_delay_ms: default_resume_retry_delay_ms(),
            connection_ceiling_secs: default_connection_ceiling_secs(),
            proactive_reconnect_fraction: default_proactive_reconnect_fraction(),
        }
    }
}

impl LiveConfig {
    /// Set the WebSocket endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before the fresh-connect retry.
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Delay before a resumption attempt.
    pub fn resume_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resume_retry_delay_ms)
    }

    /// Offset from connection open at which the client rotates the link.
    pub fn proactive_reconnect_after(&self) -> Duration {
        Duration::from_secs(self.connection_ceiling_secs)
            .mul_f64(self.proactive_reconnect_fraction)
    }

    /// MIME type announced for outbound audio chunks.
    pub fn input_mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.input_sample_rate)
    }

    /// Build the WebSocket URL with the API key query parameter.
    pub fn build_websocket_url(&self, api_key: &str) -> Result<url::Url, String> {
        let mut url = url::Url::parse(&self.websocket_url)
            .map_err(|e| format!("invalid websocket_url '{}': {e}", self.websocket_url))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.websocket_url)
            .map_err(|e| format!("invalid websocket_url '{}': {e}", self.websocket_url))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(format!(
                "websocket_url must use ws:// or wss://, got '{}'",
                url.scheme()
            ));
        }
        if self.voice.trim().is_empty() {
            return Err("voice must not be empty".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than zero".to_string());
        }
        if self.connection_ceiling_secs == 0 {
            return Err("connection_ceiling_secs must be greater than zero".to_string());
        }
        if !(self.proactive_reconnect_fraction > 0.0 && self.proactive_reconnect_fraction <= 1.0) {
            return Err(format!(
                "proactive_reconnect_fraction must be in (0, 1], got {}",
                self.proactive_reconnect_fraction
            ));
        }
        if self.input_sample_rate == 0 {
            return Err("input_sample_rate must be greater than zero".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
