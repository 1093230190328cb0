//! Reconnection policy for the Live connection manager.
//!
//! Two strategies exist and are never combined:
//! - fresh-connect retry: one retry after `initial_retry_delay` when no
//!   resumption token is held. The budget is restored after every successful
//!   fresh setup.
//! - resumption retry: reconnect with the held token after
//!   `resume_retry_delay`, without limit. A failed resumption clears the token
//!   and falls back to a single fresh attempt.
//!
//! Everything here is synchronous so the decisions can be tested without a
//! socket.

use std::time::{Duration, Instant};

use super::config::LiveConfig;

/// Kind of handshake being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// New session, no resumption handle
    Fresh,
    /// Continue a prior session with the held handle
    Resume,
}

/// What the connection manager should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Schedule another attempt after `delay`
    Retry { kind: AttemptKind, delay: Duration },
    /// Give up and surface the error
    Fatal,
}

/// Retry bookkeeping for one connection manager.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_retry_available: bool,
    initial_retry_delay: Duration,
    resume_retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(initial_retry_delay: Duration, resume_retry_delay: Duration) -> Self {
        Self {
            initial_retry_available: true,
            initial_retry_delay,
            resume_retry_delay,
        }
    }

    pub fn from_config(config: &LiveConfig) -> Self {
        Self::new(config.initial_retry_delay(), config.resume_retry_delay())
    }

    /// Whether the single fresh retry is still unused.
    pub fn initial_retry_available(&self) -> bool {
        self.initial_retry_available
    }

    /// Restore the budget, e.g. when the caller starts over after a fatal error.
    pub fn reset(&mut self) {
        self.initial_retry_available = true;
    }

    /// A handshake completed.
    pub fn on_setup_complete(&mut self, kind: AttemptKind) {
        if kind == AttemptKind::Fresh {
            self.initial_retry_available = true;
        }
    }

    /// A handshake failed before `setupComplete`.
    ///
    /// A failed resumption clears `token` and always gets one fresh fallback.
    pub fn on_handshake_failed(&mut self, kind: AttemptKind, token: &mut Option<String>) -> NextStep {
        match kind {
            AttemptKind::Resume => {
                *token = None;
                self.initial_retry_available = false;
                NextStep::Retry {
                    kind: AttemptKind::Fresh,
                    delay: self.initial_retry_delay,
                }
            }
            AttemptKind::Fresh => self.consume_initial_retry(),
        }
    }

    /// A live connection dropped without the client asking for it.
    pub fn on_connection_lost(&mut self, has_token: bool) -> NextStep {
        if has_token {
            NextStep::Retry {
                kind: AttemptKind::Resume,
                delay: self.resume_retry_delay,
            }
        } else {
            self.consume_initial_retry()
        }
    }

    fn consume_initial_retry(&mut self) -> NextStep {
        if self.initial_retry_available {
            self.initial_retry_available = false;
            NextStep::Retry {
                kind: AttemptKind::Fresh,
                delay: self.initial_retry_delay,
            }
        } else {
            NextStep::Fatal
        }
    }
}

/// Apply a `sessionResumptionUpdate`.
///
/// The handle is stored only when the server did not mark the session as
/// non-resumable and the handle is non-empty. Returns true when `current`
/// was replaced.
pub fn capture_token(
    current: &mut Option<String>,
    new_handle: Option<String>,
    resumable: Option<bool>,
) -> bool {
    if resumable == Some(false) {
        return false;
    }
    match new_handle {
        Some(handle) if !handle.is_empty() => {
            *current = Some(handle);
            true
        }
        _ => false,
    }
}

/// Instant at which the client rotates a connection opened at `opened_at`.
///
/// Anchored to the open instant so re-arming never moves it later.
pub fn proactive_deadline(opened_at: Instant, after: Duration) -> Instant {
    opened_at + after
}

/// How a server-initiated close frame should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Code 1000: the link ended cleanly
    Normal,
    /// Policy violation about the key or permissions
    Auth,
    /// Anything else
    Unexpected,
}

/// Classify a close frame by code and reason.
pub fn classify_close(code: Option<u16>, reason: &str) -> CloseKind {
    match code {
        Some(1000) => CloseKind::Normal,
        Some(1008) => {
            let reason = reason.to_ascii_lowercase();
            let auth = ["key", "permission", "auth", "credential"]
                .iter()
                .any(|needle| reason.contains(needle));
            if auth {
                CloseKind::Auth
            } else {
                CloseKind::Unexpected
            }
        }
        _ => CloseKind::Unexpected,
    }
}
