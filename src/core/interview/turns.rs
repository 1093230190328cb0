//! Turn assembly: streamed transcription fragments in, committed transcript
//! entries out.
//!
//! The orchestrator is a plain state machine. Callers pass the current
//! [`Instant`] so the watchdog can be driven by any clock.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::realtime::TranscriptRole;

/// Conversational phase shown to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPhase {
    /// Nothing has happened yet
    #[default]
    Idle,
    /// Waiting for the candidate to speak
    Listening,
    /// The candidate is speaking
    UserSpeaking,
    /// The interviewer is speaking
    AiResponding,
}

/// One committed utterance. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: TranscriptRole,
    pub text: String,
    /// Unix epoch milliseconds at commit time
    pub timestamp_ms: u64,
}

impl TranscriptEntry {
    fn new(role: TranscriptRole, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text,
            timestamp_ms: unix_millis(),
        }
    }
}

/// What caused a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitTrigger {
    TurnComplete,
    Interrupted,
    Watchdog,
    SessionEnd,
}

/// Entries committed by a single triggering event, in transcript order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCommit {
    pub trigger: CommitTrigger,
    pub entries: Vec<TranscriptEntry>,
}

impl TurnCommit {
    pub fn has_assistant_entry(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.role == TranscriptRole::Assistant)
    }
}

/// Assembles streamed fragments into transcript entries.
#[derive(Debug)]
pub struct TurnOrchestrator {
    pending_user: String,
    pending_assistant: String,
    phase: ChatPhase,
    last_activity: Option<Instant>,
    watchdog_timeout: Duration,
    transcript: Vec<TranscriptEntry>,
    question_count: u32,
}

impl TurnOrchestrator {
    pub fn new(watchdog_timeout: Duration) -> Self {
        Self {
            pending_user: String::new(),
            pending_assistant: String::new(),
            phase: ChatPhase::Idle,
            last_activity: None,
            watchdog_timeout,
            transcript: Vec::new(),
            question_count: 0,
        }
    }

    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    pub fn pending_user(&self) -> &str {
        &self.pending_user
    }

    pub fn pending_assistant(&self) -> &str {
        &self.pending_assistant
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Committed assistant entries that contained a question mark.
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    /// Whether the watchdog should be ticking.
    pub fn watchdog_armed(&self) -> bool {
        self.phase == ChatPhase::AiResponding
    }

    /// Model audio arrived.
    pub fn on_audio_chunk(&mut self, now: Instant) {
        self.last_activity = Some(now);
        self.phase = ChatPhase::AiResponding;
    }

    /// Fragment of the candidate's speech.
    pub fn on_user_text(&mut self, text: &str, now: Instant) {
        self.last_activity = Some(now);
        self.pending_user.push_str(text);
        self.phase = ChatPhase::UserSpeaking;
    }

    /// Fragment of the interviewer's speech.
    pub fn on_assistant_text(&mut self, text: &str, now: Instant) {
        self.last_activity = Some(now);
        self.pending_assistant.push_str(text);
        self.phase = ChatPhase::AiResponding;
    }

    /// The server signalled the end of the model's turn.
    pub fn on_turn_complete(&mut self) -> Option<TurnCommit> {
        self.phase = ChatPhase::Listening;
        self.commit_both(CommitTrigger::TurnComplete)
    }

    /// The candidate barged in; only the interviewer's partial text is kept.
    pub fn on_interrupted(&mut self) -> Option<TurnCommit> {
        self.phase = ChatPhase::UserSpeaking;
        let entries: Vec<_> = self
            .take_entry(TranscriptRole::Assistant)
            .into_iter()
            .collect();
        self.record(CommitTrigger::Interrupted, entries)
    }

    /// Force a commit when the model has gone quiet without `turnComplete`.
    pub fn check_watchdog(&mut self, now: Instant) -> Option<TurnCommit> {
        if self.phase != ChatPhase::AiResponding {
            return None;
        }
        let last = self.last_activity?;
        if now.saturating_duration_since(last) < self.watchdog_timeout {
            return None;
        }
        debug!(
            silent_ms = now.saturating_duration_since(last).as_millis() as u64,
            "Turn watchdog fired"
        );
        self.phase = ChatPhase::Listening;
        self.commit_both(CommitTrigger::Watchdog)
    }

    /// Flush whatever is still pending at teardown.
    pub fn finish(&mut self) -> Option<TurnCommit> {
        self.commit_both(CommitTrigger::SessionEnd)
    }

    fn commit_both(&mut self, trigger: CommitTrigger) -> Option<TurnCommit> {
        let entries: Vec<_> = [
            self.take_entry(TranscriptRole::User),
            self.take_entry(TranscriptRole::Assistant),
        ]
        .into_iter()
        .flatten()
        .collect();
        self.record(trigger, entries)
    }

    fn take_entry(&mut self, role: TranscriptRole) -> Option<TranscriptEntry> {
        let buffer = match role {
            TranscriptRole::User => &mut self.pending_user,
            TranscriptRole::Assistant => &mut self.pending_assistant,
        };
        let text = std::mem::take(buffer);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(TranscriptEntry::new(role, text.to_string()))
    }

    fn record(&mut self, trigger: CommitTrigger, entries: Vec<TranscriptEntry>) -> Option<TurnCommit> {
        if entries.is_empty() {
            return None;
        }
        for entry in &entries {
            if entry.role == TranscriptRole::Assistant && entry.text.contains('?') {
                self.question_count += 1;
            }
        }
        self.transcript.extend(entries.iter().cloned());
        Some(TurnCommit { trigger, entries })
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
