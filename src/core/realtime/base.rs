//! Base types shared by the realtime voice-session client.
//!
//! This module defines the error taxonomy, the connection state published by
//! the connection manager, and the events it emits towards the turn
//! orchestrator and the session facade.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a realtime voice session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The handshake did not complete within the connect timeout
    #[error("Connection timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    /// The socket closed or errored unexpectedly
    #[error("Connection lost: {0}")]
    TransientSocket(String),

    /// The provider rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other error reported by the provider
    #[error("Provider error{}: {message}", status_suffix(.status))]
    ServerLogic {
        /// Numeric error code, when the provider sent one
        code: Option<i64>,
        /// Status string such as `INVALID_ARGUMENT`
        status: Option<String>,
        /// Human readable message
        message: String,
    },

    /// Inbound message could not be parsed or was not recognized
    #[error("Protocol error: {0}")]
    ProtocolParse(String),

    /// Operation requires a live connection
    #[error("Not connected")]
    NotConnected,

    /// The connection manager was intentionally closed
    #[error("Session has been shut down")]
    Shutdown,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Credential provider failure
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Recording sink failure
    #[error("Recording error: {0}")]
    Recording(String),
}

impl SessionError {
    /// Whether this error is an authentication/authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, SessionError::Auth(_))
    }

    /// Build a server error, promoting permission-style failures to `Auth`.
    pub fn from_server(code: Option<i64>, status: Option<String>, message: String) -> Self {
        if is_auth_status(code, status.as_deref()) {
            return SessionError::Auth(message);
        }
        SessionError::ServerLogic {
            code,
            status,
            message,
        }
    }
}

fn status_suffix(status: &Option<String>) -> String {
    status
        .as_ref()
        .map(|s| format!(" ({s})"))
        .unwrap_or_default()
}

/// Returns true for status strings and codes that mean the key was refused.
pub(crate) fn is_auth_status(code: Option<i64>, status: Option<&str>) -> bool {
    let status_denied = status
        .map(|s| {
            let s = s.to_ascii_uppercase();
            s == "PERMISSION_DENIED" || s == "UNAUTHENTICATED"
        })
        .unwrap_or(false);
    status_denied || matches!(code, Some(401) | Some(403))
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Handshake (or a reconnect) in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Terminal failure
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Transcript Role
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// Candidate speech
    User,
    /// Interviewer (model) speech
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

// =============================================================================
// Connection Events
// =============================================================================

/// Events emitted by the connection manager, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A fresh session finished its handshake
    SetupComplete,
    /// A handshake that carried a resumption token finished
    Resumed,
    /// Decoded model audio (PCM16LE)
    AudioChunk(Bytes),
    /// Fragment of the candidate's transcribed speech
    InputTranscription(String),
    /// Fragment of the model's transcribed speech
    OutputTranscription(String),
    /// The model was interrupted by the candidate
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The model finished generating (audio may still be playing)
    GenerationComplete,
    /// The server closed the link normally
    Closed,
    /// Retries exhausted or non-retryable failure
    Fatal(SessionError),
}
