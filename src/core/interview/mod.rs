//! Interview session orchestration.
//!
//! - [`TurnOrchestrator`] turns streamed transcription into committed entries
//! - [`DeadlineController`] enforces the duration budget and wrap-up
//! - [`InterviewSession`] wires both to a [`LiveConnection`](crate::core::realtime::LiveConnection)

pub mod deadline;
pub mod session;
pub mod turns;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use deadline::{DeadlineAction, DeadlineController, DeadlinePhase};
pub use session::{InterviewConfig, InterviewSession, SessionSnapshot};
pub use turns::{ChatPhase, CommitTrigger, TranscriptEntry, TurnCommit, TurnOrchestrator};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Hard duration ceiling reached without wrap-up
    DurationElapsed,
    /// The interviewer finished the closing statement
    WrapUpCompleted,
    /// No closing statement arrived before the fallback expired
    WrapUpFallback,
    /// The server ended the connection normally
    ConnectionClosed,
    /// Unrecoverable connection error
    Failed,
    /// The caller stopped the session
    Stopped,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::DurationElapsed => "duration_elapsed",
            EndReason::WrapUpCompleted => "wrap_up_completed",
            EndReason::WrapUpFallback => "wrap_up_fallback",
            EndReason::ConnectionClosed => "connection_closed",
            EndReason::Failed => "failed",
            EndReason::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}
