//! Live API (bidirectional audio streaming) client.
//!
//! # Audio Format
//!
//! - Input: PCM 16-bit signed little-endian, mono, 16kHz by default
//! - Output: PCM 16-bit signed little-endian, mono, 24kHz
//!
//! # Connection lifetime
//!
//! The server ends every connection after a fixed ceiling. The client keeps
//! the conversation alive by capturing resumption handles and rotating onto a
//! new connection before the ceiling is reached.

mod client;
mod config;
mod messages;
mod policy;

pub use client::LiveConnection;
pub use config::{
    LIVE_CONNECTION_CEILING_SECS, LIVE_DEFAULT_MODEL, LIVE_DEFAULT_VOICE, LIVE_INPUT_SAMPLE_RATE,
    LIVE_OUTPUT_SAMPLE_RATE, LIVE_WEBSOCKET_URL, LiveConfig, Sensitivity,
};
pub use messages::{ClientMessage, ServerEvent, parse_server_message};
pub use policy::{
    AttemptKind, CloseKind, NextStep, RetryPolicy, capture_token, classify_close,
    proactive_deadline,
};
