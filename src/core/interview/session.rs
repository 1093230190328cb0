//! Interview session facade.
//!
//! [`InterviewSession`] owns one [`LiveConnection`], runs a single event loop
//! that feeds the turn orchestrator and the deadline controller, and exposes
//! the result as a [`SessionSnapshot`] through a `watch` channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use interview_voice::core::audio::NullAudioSink;
//! use interview_voice::core::credentials::StaticCredentialProvider;
//! use interview_voice::core::interview::{InterviewConfig, InterviewSession};
//! use interview_voice::core::realtime::LiveConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (session, mut commits) = InterviewSession::new(
//!         InterviewConfig::default(),
//!         LiveConfig::default(),
//!         StaticCredentialProvider::shared("your-api-key", None),
//!         Arc::new(NullAudioSink),
//!     )
//!     .unwrap();
//!
//!     session.start().await.unwrap();
//!     while let Some(commit) = commits.recv().await {
//!         for entry in commit.entries {
//!             println!("[{}] {}", entry.role, entry.text);
//!         }
//!     }
//!     let summary = session.stop().await;
//!     println!("ended: {:?}", summary.ended);
//! }
//! ```

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, Sleep, interval, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::EndReason;
use super::deadline::{DeadlineAction, DeadlineController};
use super::turns::{ChatPhase, TranscriptEntry, TurnCommit, TurnOrchestrator};
use crate::core::audio::{AudioSink, RecordingWriter, SessionRecorder, pcm16_rms_energy};
use crate::core::credentials::CredentialProvider;
use crate::core::realtime::live::LIVE_OUTPUT_SAMPLE_RATE;
use crate::core::realtime::{
    ConnectionEvent, ConnectionState, LiveConfig, LiveConnection, SessionError, SessionResult,
};

const DEADLINE_TICK: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Interview-level policy: duration budget, wrap-up, watchdog and prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewConfig {
    /// Total interview budget.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// How long before the budget ends the wrap-up phrase is sent.
    #[serde(default = "default_wrap_up_lead_secs")]
    pub wrap_up_lead_secs: u64,

    /// Maximum wait for the closing statement after wrap-up.
    #[serde(default = "default_wrap_up_fallback_secs")]
    pub wrap_up_fallback_secs: u64,

    /// Silence after which an unfinished interviewer turn is committed.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,

    /// Watchdog check interval.
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,

    /// Sent once after the first fresh setup so the interviewer speaks first.
    #[serde(default = "default_kickoff_text")]
    pub kickoff_text: String,

    /// Control phrase asking the interviewer to close.
    #[serde(default = "default_wrap_up_phrase")]
    pub wrap_up_phrase: String,

    /// Sample rate of model audio delivered to the sink.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,

    /// Optional WAV recording of the candidate's microphone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<PathBuf>,
}

fn default_duration_secs() -> u64 {
    900
}

fn default_wrap_up_lead_secs() -> u64 {
    180
}

fn default_wrap_up_fallback_secs() -> u64 {
    30
}

fn default_watchdog_timeout_ms() -> u64 {
    4_000
}

fn default_watchdog_tick_ms() -> u64 {
    1_000
}

fn default_kickoff_text() -> String {
    "Hello, I'm ready to begin the interview.".to_string()
}

fn default_wrap_up_phrase() -> String {
    "We are almost out of time. Please wrap up the interview now with a brief closing statement."
        .to_string()
}

fn default_output_sample_rate() -> u32 {
    LIVE_OUTPUT_SAMPLE_RATE
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            wrap_up_lead_secs: default_wrap_up_lead_secs(),
            wrap_up_fallback_secs: default_wrap_up_fallback_secs(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            watchdog_tick_ms: default_watchdog_tick_ms(),
            kickoff_text: default_kickoff_text(),
            wrap_up_phrase: default_wrap_up_phrase(),
            output_sample_rate: default_output_sample_rate(),
            recording_path: None,
        }
    }
}

impl InterviewConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn wrap_up_lead(&self) -> Duration {
        Duration::from_secs(self.wrap_up_lead_secs)
    }

    pub fn wrap_up_fallback(&self) -> Duration {
        Duration::from_secs(self.wrap_up_fallback_secs)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.watchdog_tick_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.duration_secs == 0 {
            return Err("duration_secs must be greater than zero".to_string());
        }
        if self.wrap_up_fallback_secs == 0 {
            return Err("wrap_up_fallback_secs must be greater than zero".to_string());
        }
        if self.watchdog_timeout_ms == 0 || self.watchdog_tick_ms == 0 {
            return Err("watchdog_timeout_ms and watchdog_tick_ms must be greater than zero".to_string());
        }
        if self.kickoff_text.trim().is_empty() {
            return Err("kickoff_text must not be empty".to_string());
        }
        if self.wrap_up_phrase.trim().is_empty() {
            return Err("wrap_up_phrase must not be empty".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Observable state of an interview session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection_state: ConnectionState,
    pub phase: ChatPhase,
    pub transcript: Vec<TranscriptEntry>,
    pub pending_user: String,
    pub pending_assistant: String,
    pub elapsed_ms: u64,
    pub wrap_up_sent: bool,
    pub question_count: u32,
    pub error: Option<String>,
    pub ended: Option<EndReason>,
}

// =============================================================================
// Session
// =============================================================================

/// One interview: connection, turn assembly, deadlines, recording.
///
/// Cloning shares the same session.
#[derive(Clone)]
pub struct InterviewSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: InterviewConfig,
    connection: LiveConnection,
    events: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    commits: mpsc::UnboundedSender<TurnCommit>,
    sink: Arc<dyn AudioSink>,
    recorder: Option<RecordingWriter>,
    snapshot: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<LoopState>>>,
    end_reason: Mutex<Option<EndReason>>,
    error: Mutex<Option<String>>,
    started: OnceCell<SessionResult<()>>,
    stopped: OnceCell<SessionSnapshot>,
}

impl InterviewSession {
    /// Build a session and the stream of transcript commits.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: InterviewConfig,
        live: LiveConfig,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn AudioSink>,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<TurnCommit>)> {
        config.validate().map_err(SessionError::InvalidConfiguration)?;

        let recorder = match &config.recording_path {
            Some(path) => Some(RecordingWriter::spawn(SessionRecorder::create(
                path,
                live.input_sample_rate,
            )?)),
            None => None,
        };

        let (connection, events) = LiveConnection::new(live, credentials)?;
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        let inner = Inner {
            config,
            connection,
            events: Mutex::new(Some(events)),
            commits: commit_tx,
            sink,
            recorder,
            snapshot: snapshot_tx,
            cancel: CancellationToken::new(),
            event_loop: Mutex::new(None),
            end_reason: Mutex::new(None),
            error: Mutex::new(None),
            started: OnceCell::new(),
            stopped: OnceCell::new(),
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            commit_rx,
        ))
    }

    /// Connect and start the event loop.
    ///
    /// Returns once the first handshake succeeded, or with the error that
    /// ended the connection attempt. Concurrent and repeated calls share the
    /// first call's outcome; calling it after [`stop`](Self::stop) fails with
    /// [`SessionError::Shutdown`].
    pub async fn start(&self) -> SessionResult<()> {
        let inner = &self.inner;
        if inner.stopped.initialized() || inner.cancel.is_cancelled() {
            return Err(SessionError::Shutdown);
        }
        inner.started.get_or_init(|| self.start_once()).await.clone()
    }

    async fn start_once(&self) -> SessionResult<()> {
        let inner = &self.inner;
        let Some(events) = inner.events.lock().take() else {
            // An earlier start was abandoned after taking the event stream
            warn!("Interview session event stream already consumed");
            return Err(SessionError::Shutdown);
        };

        info!(
            duration_secs = inner.config.duration_secs,
            wrap_up_lead_secs = inner.config.wrap_up_lead_secs,
            "Starting interview session"
        );

        if let Err(e) = inner.connection.connect().await {
            error!("Interview session failed to connect: {}", e);
            inner.end_reason.lock().get_or_insert(EndReason::Failed);
            inner.error.lock().get_or_insert_with(|| e.to_string());
            inner.snapshot.send_modify(|snapshot| {
                snapshot.connection_state = inner.connection.state();
                snapshot.error = Some(e.to_string());
            });
            return Err(e);
        }

        let state = LoopState::new(&inner.config, Instant::now());
        let state_rx = inner.connection.subscribe_state();

        // Hold the lock across spawn so a fast termination cannot run
        // teardown before the handle is stored.
        let mut event_loop = inner.event_loop.lock();
        *event_loop = Some(tokio::spawn(run_event_loop(
            Arc::clone(inner),
            events,
            state_rx,
            state,
        )));
        Ok(())
    }

    /// End the session. Idempotent; concurrent callers share one teardown
    /// and receive the same final snapshot.
    pub async fn stop(&self) -> SessionSnapshot {
        self.inner.stop().await
    }

    /// Outbound microphone chunk (PCM16LE mono at the input sample rate).
    ///
    /// Never blocks: recording happens on a writer thread and the chunk is
    /// dropped when the connection is not ready for it.
    pub fn push_audio(&self, chunk: Bytes) {
        if let Some(recorder) = &self.inner.recorder {
            recorder.push(chunk.clone());
        }
        self.inner.connection.send_audio_chunk(chunk);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.initialized()
    }
}

impl Inner {
    async fn stop(self: &Arc<Self>) -> SessionSnapshot {
        self.stopped.get_or_init(|| self.teardown()).await.clone()
    }

    async fn teardown(&self) -> SessionSnapshot {
        let reason = *self.end_reason.lock().get_or_insert(EndReason::Stopped);
        info!(%reason, "Stopping interview session");

        self.cancel.cancel();
        let handle = self.event_loop.lock().take();
        let state = match handle {
            Some(handle) => match handle.await {
                Ok(state) => Some(state),
                Err(e) => {
                    error!("Interview event loop panicked: {}", e);
                    None
                }
            },
            None => None,
        };

        self.connection.disconnect().await;

        let mut state = state;
        if let Some(state) = state.as_mut() {
            if let Some(commit) = state.turns.finish() {
                let _ = self.commits.send(commit);
            }
        }

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.finish().await {
                warn!("{}", e);
            }
        }

        let snapshot = match &state {
            Some(state) => state.snapshot(self),
            None => {
                let mut snapshot = self.snapshot.borrow().clone();
                snapshot.connection_state = self.connection.state();
                snapshot.error = self.error.lock().clone();
                snapshot.ended = Some(reason);
                snapshot
            }
        };
        self.snapshot.send_replace(snapshot.clone());
        info!(
            %reason,
            entries = snapshot.transcript.len(),
            elapsed_ms = snapshot.elapsed_ms,
            "Interview session stopped"
        );
        snapshot
    }

    fn publish(&self, state: &LoopState) {
        self.snapshot.send_replace(state.snapshot(self));
    }
}

// =============================================================================
// Event loop
// =============================================================================

struct LoopState {
    turns: TurnOrchestrator,
    deadline: DeadlineController,
    kickoff_sent: bool,
}

impl LoopState {
    fn new(config: &InterviewConfig, session_start: Instant) -> Self {
        Self {
            turns: TurnOrchestrator::new(config.watchdog_timeout()),
            deadline: DeadlineController::new(
                config.duration(),
                config.wrap_up_lead(),
                config.wrap_up_fallback(),
                session_start,
            ),
            kickoff_sent: false,
        }
    }

    fn snapshot(&self, inner: &Inner) -> SessionSnapshot {
        SessionSnapshot {
            connection_state: inner.connection.state(),
            phase: self.turns.phase(),
            transcript: self.turns.transcript().to_vec(),
            pending_user: self.turns.pending_user().to_string(),
            pending_assistant: self.turns.pending_assistant().to_string(),
            elapsed_ms: self.deadline.elapsed_ms(),
            wrap_up_sent: self.deadline.wrap_up_sent(),
            question_count: self.turns.question_count(),
            error: inner.error.lock().clone(),
            ended: *inner.end_reason.lock(),
        }
    }

    /// Report a commit and let the deadline controller see it.
    fn commit(&mut self, inner: &Inner, commit: Option<TurnCommit>) -> Option<EndReason> {
        let commit = commit?;
        let action = self.deadline.on_commit(&commit);
        let _ = inner.commits.send(commit);
        match action {
            DeadlineAction::Terminate(reason) => Some(reason),
            _ => None,
        }
    }

    async fn on_event(&mut self, inner: &Inner, event: ConnectionEvent) -> Option<EndReason> {
        let now = Instant::now();
        match event {
            ConnectionEvent::SetupComplete => {
                if !self.kickoff_sent {
                    self.kickoff_sent = true;
                    if let Err(e) = inner.connection.send_text(inner.config.kickoff_text.as_str()).await
                    {
                        warn!("Failed to send kickoff text: {}", e);
                    }
                } else {
                    info!("Fresh session established after fallback");
                }
                None
            }
            ConnectionEvent::Resumed => {
                info!("Interview session resumed");
                None
            }
            ConnectionEvent::AudioChunk(chunk) => {
                let before = self.turns.phase();
                self.turns.on_audio_chunk(now);
                let energy = pcm16_rms_energy(&chunk);
                inner.sink.deliver_inbound_chunk(chunk);
                inner.sink.on_output_energy(energy);
                if before != self.turns.phase() {
                    inner.publish(self);
                }
                None
            }
            ConnectionEvent::InputTranscription(text) => {
                self.turns.on_user_text(&text, now);
                inner.publish(self);
                None
            }
            ConnectionEvent::OutputTranscription(text) => {
                self.turns.on_assistant_text(&text, now);
                inner.publish(self);
                None
            }
            ConnectionEvent::Interrupted => {
                let commit = self.turns.on_interrupted();
                let end = self.commit(inner, commit);
                inner.publish(self);
                end
            }
            ConnectionEvent::TurnComplete => {
                let commit = self.turns.on_turn_complete();
                let end = self.commit(inner, commit);
                inner.publish(self);
                end
            }
            ConnectionEvent::GenerationComplete => {
                debug!("Generation complete");
                None
            }
            ConnectionEvent::Closed => Some(EndReason::ConnectionClosed),
            ConnectionEvent::Fatal(err) => {
                error!("Interview connection failed: {}", err);
                inner.error.lock().get_or_insert_with(|| err.to_string());
                Some(EndReason::Failed)
            }
        }
    }

    async fn on_deadline_tick(
        &mut self,
        inner: &Inner,
        fallback: &mut Option<Pin<Box<Sleep>>>,
    ) -> Option<EndReason> {
        let end = match self.deadline.tick(Instant::now()) {
            DeadlineAction::SendWrapUp => {
                if let Err(e) = inner.connection.send_text(inner.config.wrap_up_phrase.as_str()).await {
                    warn!("Failed to send wrap-up phrase: {}", e);
                }
                if let Some(at) = self.deadline.fallback_deadline() {
                    *fallback = Some(Box::pin(sleep_until(at.into())));
                }
                None
            }
            DeadlineAction::Terminate(reason) => Some(reason),
            DeadlineAction::None => None,
        };
        inner.publish(self);
        end
    }

    fn on_watchdog(&mut self, inner: &Inner) -> Option<EndReason> {
        let commit = self.turns.check_watchdog(Instant::now())?;
        let end = self.commit(inner, Some(commit));
        inner.publish(self);
        end
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    mut state_rx: watch::Receiver<ConnectionState>,
    mut state: LoopState,
) -> LoopState {
    let mut deadline_tick = interval(DEADLINE_TICK);
    deadline_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watchdog_tick = interval(inner.config.watchdog_tick());
    watchdog_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fallback: Option<Pin<Box<Sleep>>> = None;
    let mut state_open = true;

    inner.publish(&state);

    loop {
        let end = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => state.on_event(&inner, event).await,
                None => Some(EndReason::ConnectionClosed),
            },
            changed = state_rx.changed(), if state_open => {
                if changed.is_err() {
                    state_open = false;
                } else {
                    let connection_state = *state_rx.borrow_and_update();
                    debug!(%connection_state, "Interview saw connection state change");
                    inner.publish(&state);
                }
                None
            },
            _ = deadline_tick.tick() => state.on_deadline_tick(&inner, &mut fallback).await,
            _ = watchdog_tick.tick(), if state.turns.watchdog_armed() => state.on_watchdog(&inner),
            _ = fire(&mut fallback) => {
                fallback = None;
                state.on_deadline_tick(&inner, &mut fallback).await
            },
        };

        if let Some(reason) = end {
            inner.end_reason.lock().get_or_insert(reason);
            info!(%reason, "Interview ending");
            let stopper = Arc::clone(&inner);
            tokio::spawn(async move {
                stopper.stop().await;
            });
            break;
        }
    }

    state
}
