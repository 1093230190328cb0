//! Environment variable layer.
//!
//! `.env` is loaded by the binary at startup, so values from it arrive here as
//! ordinary environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use zeroize::Zeroizing;

use super::{AppConfig, ConfigError, CredentialSource};
use crate::core::interview::InterviewConfig;
use crate::core::realtime::LiveConfig;
use crate::core::realtime::live::Sensitivity;

/// Read a variable, treating blank values as unset.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable.
pub(crate) fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Env {
            name: name.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(None),
    }
}

/// Defaults overridden by whatever the environment provides.
pub(crate) fn load_env() -> Result<AppConfig, ConfigError> {
    let mut live = LiveConfig::default();
    if let Some(url) = env_var("LIVE_WEBSOCKET_URL") {
        live.websocket_url = url;
    }
    if let Some(model) = env_var("LIVE_MODEL") {
        live.model = model;
    }
    if let Some(voice) = env_var("LIVE_VOICE") {
        live.voice = voice;
    }
    if let Some(instruction) = env_var("LIVE_SYSTEM_INSTRUCTION") {
        live.system_instruction = Some(instruction);
    }
    if let Some(s) = env_var("LIVE_START_SENSITIVITY") {
        live.start_of_speech_sensitivity = Sensitivity::from_str_or_default(&s);
    }
    if let Some(s) = env_var("LIVE_END_SENSITIVITY") {
        live.end_of_speech_sensitivity = Sensitivity::from_str_or_default(&s);
    }
    if let Some(v) = parse_env("LIVE_PREFIX_PADDING_MS")? {
        live.prefix_padding_ms = v;
    }
    if let Some(v) = parse_env("LIVE_SILENCE_DURATION_MS")? {
        live.silence_duration_ms = v;
    }
    if let Some(v) = parse_env("LIVE_INPUT_SAMPLE_RATE")? {
        live.input_sample_rate = v;
    }
    if let Some(v) = parse_env("LIVE_CONNECT_TIMEOUT_MS")? {
        live.connect_timeout_ms = v;
    }
    if let Some(v) = parse_env("LIVE_INITIAL_RETRY_DELAY_MS")? {
        live.initial_retry_delay_ms = v;
    }
    if let Some(v) = parse_env("LIVE_RESUME_RETRY_DELAY_MS")? {
        live.resume_retry_delay_ms = v;
    }
    if let Some(v) = parse_env("LIVE_CONNECTION_CEILING_SECS")? {
        live.connection_ceiling_secs = v;
    }
    if let Some(v) = parse_env("LIVE_PROACTIVE_RECONNECT_FRACTION")? {
        live.proactive_reconnect_fraction = v;
    }

    let mut interview = InterviewConfig::default();
    if let Some(v) = parse_env("INTERVIEW_DURATION_SECS")? {
        interview.duration_secs = v;
    }
    if let Some(v) = parse_env("INTERVIEW_WRAP_UP_LEAD_SECS")? {
        interview.wrap_up_lead_secs = v;
    }
    if let Some(v) = parse_env("INTERVIEW_WRAP_UP_FALLBACK_SECS")? {
        interview.wrap_up_fallback_secs = v;
    }
    if let Some(v) = parse_env("INTERVIEW_WATCHDOG_TIMEOUT_MS")? {
        interview.watchdog_timeout_ms = v;
    }
    if let Some(v) = parse_env("INTERVIEW_WATCHDOG_TICK_MS")? {
        interview.watchdog_tick_ms = v;
    }
    if let Some(text) = env_var("INTERVIEW_KICKOFF_TEXT") {
        interview.kickoff_text = text;
    }
    if let Some(text) = env_var("INTERVIEW_WRAP_UP_PHRASE") {
        interview.wrap_up_phrase = text;
    }
    if let Some(v) = parse_env("INTERVIEW_OUTPUT_SAMPLE_RATE")? {
        interview.output_sample_rate = v;
    }
    if let Some(path) = env_var("INTERVIEW_RECORDING_PATH") {
        interview.recording_path = Some(PathBuf::from(path));
    }

    let credentials = if let Some(url) = env_var("CREDENTIALS_URL") {
        Some(CredentialSource::Http {
            url,
            bearer_token: env_var("CREDENTIALS_BEARER_TOKEN").map(Zeroizing::new),
            ttl_secs: parse_env("CREDENTIALS_TTL_SECONDS")?
                .unwrap_or(super::DEFAULT_CREDENTIALS_TTL_SECS),
            timeout_ms: parse_env("CREDENTIALS_TIMEOUT_MS")?
                .unwrap_or(super::DEFAULT_CREDENTIALS_TIMEOUT_MS),
        })
    } else {
        env_var("GEMINI_API_KEY")
            .or_else(|| env_var("GOOGLE_API_KEY"))
            .map(|api_key| CredentialSource::Static {
                api_key: Zeroizing::new(api_key),
                model: None,
            })
    };

    Ok(AppConfig {
        live,
        interview,
        credentials,
    })
}
