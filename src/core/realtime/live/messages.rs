//! Live API WebSocket message types.
//!
//! All messages are JSON objects. The client sends exactly one top-level key
//! per message; the server may combine several keys in one frame.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, voice, activity detection, transcription, resumption handle
//! - realtimeInput - Base64 PCM microphone chunk
//! - clientContent - Text turn (kickoff / wrap-up control phrase)
//!
//! Server messages (received from server):
//! - setupComplete - Handshake acknowledged (fresh or resumed)
//! - sessionResumptionUpdate - New resumption handle and resumability flag
//! - serverContent - Model audio, transcriptions, turn/interruption markers
//! - goAway - Connection will be closed soon
//! - usageMetadata - Token accounting
//! - error - Error occurred

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::config::LiveConfig;

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent from the client to the Live API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session setup, always the first message on a connection
    Setup(Setup),
    /// Streaming microphone input
    RealtimeInput(RealtimeInput),
    /// Complete text turn
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Create a realtime audio message from raw PCM bytes.
    pub fn audio(pcm: &[u8], mime_type: &str) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                data: BASE64_STANDARD.encode(pcm),
                mime_type: mime_type.to_string(),
            },
        })
    }

    /// Create a completed user text turn.
    pub fn user_text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }],
            turn_complete: true,
        })
    }

    /// Build the setup message for a connection.
    ///
    /// `handle` is the resumption token to present, if one is held.
    pub fn setup(config: &LiveConfig, model: &str, handle: Option<&str>) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text)],
            }),
            realtime_input_config: RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection {
                    start_of_speech_sensitivity: config
                        .start_of_speech_sensitivity
                        .start_value()
                        .to_string(),
                    end_of_speech_sensitivity: config
                        .end_of_speech_sensitivity
                        .end_value()
                        .to_string(),
                    prefix_padding_ms: config.prefix_padding_ms,
                    silence_duration_ms: config.silence_duration_ms,
                },
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
            session_resumption: SessionResumptionConfig {
                handle: handle.map(str::to_string),
            },
        })
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Setup payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Model resource name
    pub model: String,
    /// Output modality and voice
    pub generation_config: GenerationConfig,
    /// Interviewer instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Activity detection tuning
    pub realtime_input_config: RealtimeInputConfig,
    /// Enables candidate speech transcription
    pub input_audio_transcription: TranscriptionConfig,
    /// Enables model speech transcription
    pub output_audio_transcription: TranscriptionConfig,
    /// Requests resumption updates, optionally resuming a prior session
    pub session_resumption: SessionResumptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

/// Server-side voice activity detection parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    pub start_of_speech_sensitivity: String,
    pub end_of_speech_sensitivity: String,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Empty object enabling a transcription stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

// =============================================================================
// Shared Content Types
// =============================================================================

/// A role-tagged list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a content block: text or inline binary data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Part {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

// =============================================================================
// Server Messages
// =============================================================================

/// Raw server frame. Several keys may be present at once.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
    pub usage_metadata: Option<serde_json::Value>,
    pub tool_call: Option<serde_json::Value>,
    pub tool_call_cancellation: Option<serde_json::Value>,
    pub error: Option<ServerErrorPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    #[serde(default)]
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub generation_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerErrorPayload {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A single semantic event extracted from a server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    ResumptionUpdate {
        new_handle: Option<String>,
        resumable: Option<bool>,
    },
    Audio(Bytes),
    InputTranscription(String),
    OutputTranscription(String),
    Interrupted,
    GenerationComplete,
    TurnComplete,
    GoAway {
        time_left: Option<String>,
    },
    Error {
        code: Option<i64>,
        status: Option<String>,
        message: String,
    },
}

/// Parse a server frame into its events, in processing order.
///
/// Malformed JSON and frames without any known key are errors.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>, String> {
    let msg: ServerMessage =
        serde_json::from_str(text).map_err(|e| format!("malformed server message: {e}"))?;

    let mut recognized = false;
    let mut events = Vec::new();

    if let Some(err) = msg.error {
        recognized = true;
        events.push(ServerEvent::Error {
            code: err.code,
            status: err.status,
            message: err.message.unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    if msg.setup_complete.is_some() {
        recognized = true;
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(update) = msg.session_resumption_update {
        recognized = true;
        events.push(ServerEvent::ResumptionUpdate {
            new_handle: update.new_handle,
            resumable: update.resumable,
        });
    }

    if let Some(content) = msg.server_content {
        recognized = true;
        collect_content_events(content, &mut events);
    }

    if let Some(go_away) = msg.go_away {
        recognized = true;
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }

    if msg.usage_metadata.is_some() || msg.tool_call.is_some() || msg.tool_call_cancellation.is_some()
    {
        recognized = true;
    }

    if !recognized {
        return Err(format!(
            "unrecognized server message: {}",
            text.chars().take(120).collect::<String>()
        ));
    }

    Ok(events)
}

fn collect_content_events(content: ServerContent, events: &mut Vec<ServerEvent>) {
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(blob) = part.inline_data else {
                continue;
            };
            if !blob.mime_type.starts_with("audio/") {
                tracing::trace!("Ignoring inline data of type {}", blob.mime_type);
                continue;
            }
            match BASE64_STANDARD.decode(blob.data.as_bytes()) {
                Ok(bytes) => events.push(ServerEvent::Audio(Bytes::from(bytes))),
                Err(e) => tracing::error!("Failed to decode audio part: {}", e),
            }
        }
    }

    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            events.push(ServerEvent::InputTranscription(text));
        }
    }

    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            events.push(ServerEvent::OutputTranscription(text));
        }
    }

    if content.interrupted == Some(true) {
        events.push(ServerEvent::Interrupted);
    }

    if content.generation_complete == Some(true) {
        events.push(ServerEvent::GenerationComplete);
    }

    if content.turn_complete == Some(true) {
        events.push(ServerEvent::TurnComplete);
    }
}

// =============================================================================
// Tests
// =============================================================================
