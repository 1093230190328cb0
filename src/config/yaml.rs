use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// credentials:
///   # Either a static key...
///   api_key: "your-api-key"
///   model: "models/gemini-2.5-flash-native-audio-preview-09-2025"
///   # ...or a token endpoint returning {"apiKey", "model"}
///   url: "https://backend.example.com/api/live/token"
///   bearer_token: "session-jwt"
///   ttl_seconds: 300
///   timeout_ms: 10000
///
/// live:
///   websocket_url: "wss://generativelanguage.googleapis.com/ws/..."
///   voice: "Puck"
///   system_instruction: "You are a friendly technical interviewer."
///   start_of_speech_sensitivity: high
///   end_of_speech_sensitivity: low
///   prefix_padding_ms: 300
///   silence_duration_ms: 1000
///   connect_timeout_ms: 15000
///   initial_retry_delay_ms: 2000
///   resume_retry_delay_ms: 1000
///   connection_ceiling_secs: 600
///   proactive_reconnect_fraction: 0.9
///
/// interview:
///   duration_secs: 900
///   wrap_up_lead_secs: 180
///   wrap_up_fallback_secs: 30
///   watchdog_timeout_ms: 4000
///   watchdog_tick_ms: 1000
///   kickoff_text: "Hello, I'm ready to begin the interview."
///   wrap_up_phrase: "Please wrap up the interview now."
///   recording_path: "/var/lib/interviews/candidate.wav"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub credentials: Option<CredentialsYaml>,
    pub live: Option<LiveYaml>,
    pub interview: Option<InterviewYaml>,
}

/// Credential source from YAML
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub url: Option<String>,
    pub bearer_token: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl std::fmt::Debug for CredentialsYaml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsYaml")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("url", &self.url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("ttl_seconds", &self.ttl_seconds)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Live connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LiveYaml {
    pub websocket_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub start_of_speech_sensitivity: Option<String>,
    pub end_of_speech_sensitivity: Option<String>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub input_sample_rate: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub initial_retry_delay_ms: Option<u64>,
    pub resume_retry_delay_ms: Option<u64>,
    pub connection_ceiling_secs: Option<u64>,
    pub proactive_reconnect_fraction: Option<f64>,
}

/// Interview policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InterviewYaml {
    pub duration_secs: Option<u64>,
    pub wrap_up_lead_secs: Option<u64>,
    pub wrap_up_fallback_secs: Option<u64>,
    pub watchdog_timeout_ms: Option<u64>,
    pub watchdog_tick_ms: Option<u64>,
    pub kickoff_text: Option<String>,
    pub wrap_up_phrase: Option<String>,
    pub output_sample_rate: Option<u32>,
    pub recording_path: Option<PathBuf>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
