//! Interview duration budget and wrap-up enforcement.
//!
//! `Running -> WrapUpSent -> Terminated`, never backwards. Elapsed time is
//! recomputed from the session start on every tick.
//!
//! Elapsed time is the larger of the monotonic and the wall-clock reading.
//! The monotonic clock stops during system suspend; the wall clock keeps
//! counting, so a suspended interview still ends on time. A wall clock
//! stepped backwards never shortens elapsed below the monotonic reading.

use std::time::{Duration, Instant, SystemTime};

use tracing::info;

use super::EndReason;
use super::turns::{CommitTrigger, TurnCommit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePhase {
    Running,
    WrapUpSent,
    Terminated,
}

/// What the session should do after feeding the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineAction {
    None,
    /// Send the wrap-up phrase and arm the fallback timer
    SendWrapUp,
    /// End the session
    Terminate(EndReason),
}

#[derive(Debug)]
pub struct DeadlineController {
    duration: Duration,
    wrap_up_lead: Duration,
    wrap_up_fallback: Duration,
    session_start: Instant,
    wall_start: SystemTime,
    elapsed: Duration,
    phase: DeadlinePhase,
    wrap_up_sent_at: Option<Instant>,
    wrap_up_sent_elapsed: Option<Duration>,
    wrap_up_acknowledged: bool,
}

impl DeadlineController {
    pub fn new(
        duration: Duration,
        wrap_up_lead: Duration,
        wrap_up_fallback: Duration,
        session_start: Instant,
    ) -> Self {
        Self {
            duration,
            wrap_up_lead,
            wrap_up_fallback,
            session_start,
            wall_start: SystemTime::now(),
            elapsed: Duration::ZERO,
            phase: DeadlinePhase::Running,
            wrap_up_sent_at: None,
            wrap_up_sent_elapsed: None,
            wrap_up_acknowledged: false,
        }
    }

    pub fn phase(&self) -> DeadlinePhase {
        self.phase
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    pub fn wrap_up_sent(&self) -> bool {
        self.wrap_up_sent_at.is_some()
    }

    pub fn wrap_up_acknowledged(&self) -> bool {
        self.wrap_up_acknowledged
    }

    /// Offset from the start at which wrap-up is sent.
    pub fn wrap_up_threshold(&self) -> Duration {
        self.duration.saturating_sub(self.wrap_up_lead)
    }

    /// When the wrap-up fallback expires, once wrap-up has been sent.
    pub fn fallback_deadline(&self) -> Option<Instant> {
        self.wrap_up_sent_at.map(|at| at + self.wrap_up_fallback)
    }

    /// Re-evaluate against the clock.
    pub fn tick(&mut self, now: Instant) -> DeadlineAction {
        self.advance(now, SystemTime::now())
    }

    fn advance(&mut self, now: Instant, wall_now: SystemTime) -> DeadlineAction {
        let monotonic = now.saturating_duration_since(self.session_start);
        let wall = wall_now
            .duration_since(self.wall_start)
            .unwrap_or(Duration::ZERO);
        self.elapsed = monotonic.max(wall);

        match self.phase {
            DeadlinePhase::Running => {
                if self.elapsed >= self.duration {
                    info!(elapsed_ms = self.elapsed_ms(), "Interview duration exhausted");
                    self.phase = DeadlinePhase::Terminated;
                    DeadlineAction::Terminate(EndReason::DurationElapsed)
                } else if self.elapsed >= self.wrap_up_threshold() {
                    info!(elapsed_ms = self.elapsed_ms(), "Sending wrap-up");
                    self.phase = DeadlinePhase::WrapUpSent;
                    self.wrap_up_sent_at = Some(now);
                    self.wrap_up_sent_elapsed = Some(self.elapsed);
                    DeadlineAction::SendWrapUp
                } else {
                    DeadlineAction::None
                }
            }
            DeadlinePhase::WrapUpSent => {
                let by_instant = self.fallback_deadline().is_some_and(|at| now >= at);
                let by_elapsed = self
                    .wrap_up_sent_elapsed
                    .is_some_and(|at| self.elapsed >= at + self.wrap_up_fallback);
                if by_instant || by_elapsed {
                    info!("Wrap-up fallback expired");
                    self.phase = DeadlinePhase::Terminated;
                    DeadlineAction::Terminate(EndReason::WrapUpFallback)
                } else {
                    DeadlineAction::None
                }
            }
            DeadlinePhase::Terminated => DeadlineAction::None,
        }
    }

    /// A turn was committed. The closing statement counts when it completed
    /// normally or via the watchdog and contains interviewer speech.
    pub fn on_commit(&mut self, commit: &TurnCommit) -> DeadlineAction {
        if self.phase != DeadlinePhase::WrapUpSent {
            return DeadlineAction::None;
        }
        let completed = matches!(
            commit.trigger,
            CommitTrigger::TurnComplete | CommitTrigger::Watchdog
        );
        if !completed || !commit.has_assistant_entry() {
            return DeadlineAction::None;
        }
        info!("Closing statement finished");
        self.wrap_up_acknowledged = true;
        self.phase = DeadlinePhase::Terminated;
        DeadlineAction::Terminate(EndReason::WrapUpCompleted)
    }
}
