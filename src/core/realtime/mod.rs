//! Realtime voice-session module.
//!
//! This module provides the connection layer for a long-lived bidirectional
//! audio/text session with a conversational speech model.
//!
//! # Architecture
//!
//! - `base` holds the error taxonomy, connection state and connection events
//! - `live` implements the Live API connection manager
//!
//! Events flow one way out of the connection manager over an unbounded
//! `mpsc` channel; state is published through a `watch` channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use interview_voice::core::credentials::StaticCredentialProvider;
//! use interview_voice::core::realtime::{ConnectionEvent, LiveConfig, LiveConnection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = StaticCredentialProvider::shared("your-api-key", None);
//!     let (connection, mut events) = LiveConnection::new(LiveConfig::default(), provider).unwrap();
//!     connection.connect().await.unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         if let ConnectionEvent::OutputTranscription(text) = event {
//!             print!("{text}");
//!         }
//!     }
//! }
//! ```

mod base;
pub mod live;

pub use base::{
    ConnectionEvent, ConnectionState, SessionError, SessionResult, TranscriptRole,
};
pub use live::{LiveConfig, LiveConnection};
