//! Configuration module for the interview voice client
//!
//! This module handles configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use interview_voice::config::AppConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AppConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = AppConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Interview budget: {}s", config.interview.duration_secs);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroizing;

mod env;
mod yaml;

pub use yaml::{CredentialsYaml, InterviewYaml, LiveYaml, YamlConfig};

use crate::core::credentials::{
    CredentialProvider, HttpCredentialProvider, StaticCredentialProvider,
};
use crate::core::interview::InterviewConfig;
use crate::core::realtime::LiveConfig;
use crate::core::realtime::live::Sensitivity;

const DEFAULT_CREDENTIALS_TTL_SECS: u64 = 300;
const DEFAULT_CREDENTIALS_TIMEOUT_MS: u64 = 10_000;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {message}")]
    Env { name: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where Live API credentials come from
#[derive(Clone)]
pub enum CredentialSource {
    /// A fixed API key
    Static {
        api_key: Zeroizing<String>,
        model: Option<String>,
    },
    /// A token endpoint returning `{"apiKey", "model"}`
    Http {
        url: String,
        bearer_token: Option<Zeroizing<String>>,
        ttl_secs: u64,
        timeout_ms: u64,
    },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Static { model, .. } => f
                .debug_struct("Static")
                .field("api_key", &"<redacted>")
                .field("model", model)
                .finish(),
            CredentialSource::Http {
                url,
                ttl_secs,
                timeout_ms,
                ..
            } => f
                .debug_struct("Http")
                .field("url", url)
                .field("ttl_secs", ttl_secs)
                .field("timeout_ms", timeout_ms)
                .finish(),
        }
    }
}

/// Application configuration
///
/// Contains everything needed to run one interview session:
/// - Live connection settings (endpoint, voice, activity detection, retries)
/// - Interview policy (duration, wrap-up, watchdog, prompts, recording)
/// - Credential source
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub live: LiveConfig,
    pub interview: InterviewConfig,
    pub credentials: Option<CredentialSource>,
}

impl AppConfig {
    /// Load configuration from environment variables and defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = env::load_env()?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(creds) = yaml.credentials {
            self.apply_credentials_yaml(creds);
        }

        if let Some(l) = yaml.live {
            let live = &mut self.live;
            if let Some(v) = l.websocket_url {
                live.websocket_url = v;
            }
            if let Some(v) = l.model {
                live.model = v;
            }
            if let Some(v) = l.voice {
                live.voice = v;
            }
            if let Some(v) = l.system_instruction {
                live.system_instruction = Some(v);
            }
            if let Some(v) = l.start_of_speech_sensitivity {
                live.start_of_speech_sensitivity = Sensitivity::from_str_or_default(&v);
            }
            if let Some(v) = l.end_of_speech_sensitivity {
                live.end_of_speech_sensitivity = Sensitivity::from_str_or_default(&v);
            }
            if let Some(v) = l.prefix_padding_ms {
                live.prefix_padding_ms = v;
            }
            if let Some(v) = l.silence_duration_ms {
                live.silence_duration_ms = v;
            }
            if let Some(v) = l.input_sample_rate {
                live.input_sample_rate = v;
            }
            if let Some(v) = l.connect_timeout_ms {
                live.connect_timeout_ms = v;
            }
            if let Some(v) = l.initial_retry_delay_ms {
                live.initial_retry_delay_ms = v;
            }
            if let Some(v) = l.resume_retry_delay_ms {
                live.resume_retry_delay_ms = v;
            }
            if let Some(v) = l.connection_ceiling_secs {
                live.connection_ceiling_secs = v;
            }
            if let Some(v) = l.proactive_reconnect_fraction {
                live.proactive_reconnect_fraction = v;
            }
        }

        if let Some(i) = yaml.interview {
            let interview = &mut self.interview;
            if let Some(v) = i.duration_secs {
                interview.duration_secs = v;
            }
            if let Some(v) = i.wrap_up_lead_secs {
                interview.wrap_up_lead_secs = v;
            }
            if let Some(v) = i.wrap_up_fallback_secs {
                interview.wrap_up_fallback_secs = v;
            }
            if let Some(v) = i.watchdog_timeout_ms {
                interview.watchdog_timeout_ms = v;
            }
            if let Some(v) = i.watchdog_tick_ms {
                interview.watchdog_tick_ms = v;
            }
            if let Some(v) = i.kickoff_text {
                interview.kickoff_text = v;
            }
            if let Some(v) = i.wrap_up_phrase {
                interview.wrap_up_phrase = v;
            }
            if let Some(v) = i.output_sample_rate {
                interview.output_sample_rate = v;
            }
            if let Some(v) = i.recording_path {
                interview.recording_path = Some(v);
            }
        }
    }

    fn apply_credentials_yaml(&mut self, creds: CredentialsYaml) {
        if let Some(url) = creds.url {
            self.credentials = Some(CredentialSource::Http {
                url,
                bearer_token: creds.bearer_token.map(Zeroizing::new),
                ttl_secs: creds.ttl_seconds.unwrap_or(DEFAULT_CREDENTIALS_TTL_SECS),
                timeout_ms: creds.timeout_ms.unwrap_or(DEFAULT_CREDENTIALS_TIMEOUT_MS),
            });
        } else if let Some(api_key) = creds.api_key {
            self.credentials = Some(CredentialSource::Static {
                api_key: Zeroizing::new(api_key),
                model: creds.model,
            });
        } else if let Some(model) = creds.model {
            if let Some(CredentialSource::Static { model: current, .. }) = &mut self.credentials {
                *current = Some(model);
            }
        }
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.live.validate().map_err(ConfigError::Invalid)?;
        self.interview.validate().map_err(ConfigError::Invalid)?;

        match &self.credentials {
            None => Err(ConfigError::Invalid(
                "no credentials configured: set GEMINI_API_KEY or CREDENTIALS_URL".to_string(),
            )),
            Some(CredentialSource::Static { api_key, .. }) if api_key.trim().is_empty() => Err(
                ConfigError::Invalid("credentials api_key must not be empty".to_string()),
            ),
            Some(CredentialSource::Http {
                url,
                ttl_secs,
                timeout_ms,
                ..
            }) => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| ConfigError::Invalid(format!("invalid credentials url: {e}")))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(ConfigError::Invalid(format!(
                        "credentials url must use http or https, got '{}'",
                        parsed.scheme()
                    )));
                }
                if *ttl_secs == 0 {
                    return Err(ConfigError::Invalid(
                        "credentials ttl_seconds must be greater than zero".to_string(),
                    ));
                }
                if *timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "credentials timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            Some(CredentialSource::Static { .. }) => Ok(()),
        }
    }

    /// Build the credential provider described by this configuration.
    pub fn credential_provider(&self) -> Result<Arc<dyn CredentialProvider>, ConfigError> {
        match &self.credentials {
            Some(CredentialSource::Static { api_key, model }) => Ok(Arc::new(
                StaticCredentialProvider::new(api_key.as_str(), model.clone()),
            )),
            Some(CredentialSource::Http {
                url,
                bearer_token,
                ttl_secs,
                timeout_ms,
            }) => {
                let mut provider = HttpCredentialProvider::new(url.clone())
                    .with_ttl(Duration::from_secs(*ttl_secs))
                    .with_timeout(Duration::from_millis(*timeout_ms));
                if let Some(token) = bearer_token {
                    provider = provider.with_bearer_token(token.as_str());
                }
                Ok(Arc::new(provider))
            }
            None => Err(ConfigError::Invalid("no credentials configured".to_string())),
        }
    }
}
