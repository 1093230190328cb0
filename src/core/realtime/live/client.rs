//! Live API connection manager.
//!
//! A single actor task owns the WebSocket, the resumption token, every
//! connection timer and the retry bookkeeping. [`LiveConnection`] is a cheap
//! handle that talks to the actor over a command channel and observes its
//! state through a `watch` channel.
//!
//! # Features
//!
//! - Handshake bounded by `connect_timeout` (credential fetch, socket open, setup ack)
//! - One fresh-connect retry, unlimited resumption retries
//! - Resumption token capture from `sessionResumptionUpdate`
//! - Proactive rotation before the server's connection ceiling, and on `goAway`
//! - Bounded microphone queue; chunks are dropped when the socket falls behind
//! - Sticky intentional disconnect
//!
//! # Example
//!
//! ```rust,ignore
//! use interview_voice::core::credentials::StaticCredentialProvider;
//! use interview_voice::core::realtime::live::{LiveConfig, LiveConnection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let provider = StaticCredentialProvider::shared("your-api-key", None);
//!     let (connection, mut events) = LiveConnection::new(LiveConfig::default(), provider).unwrap();
//!
//!     connection.connect().await.unwrap();
//!     connection.send_text("Please begin the interview.").await.unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep, sleep_until};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use super::config::LiveConfig;
use super::messages::{ClientMessage, ServerEvent, parse_server_message};
use super::policy::{
    AttemptKind, CloseKind, NextStep, RetryPolicy, capture_token, classify_close,
    proactive_deadline,
};
use crate::core::credentials::CredentialProvider;
use crate::core::realtime::base::{ConnectionEvent, ConnectionState, SessionError, SessionResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound microphone chunks waiting for the socket. Full queue drops.
const AUDIO_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Public handle
// =============================================================================

enum Command {
    Connect(oneshot::Sender<SessionResult<()>>),
    Disconnect(oneshot::Sender<()>),
    Text(String, oneshot::Sender<SessionResult<()>>),
}

/// Handle to the Live connection manager.
///
/// Cloning the handle shares the same connection. The actor stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct LiveConnection {
    commands: mpsc::UnboundedSender<Command>,
    audio: mpsc::Sender<Bytes>,
    state: watch::Receiver<ConnectionState>,
}

impl LiveConnection {
    /// Validate `config`, spawn the connection actor and return the handle
    /// together with the event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: LiveConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)> {
        config.validate().map_err(SessionError::InvalidConfiguration)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = ConnectionActor::new(config, credentials, command_rx, audio_rx, event_tx, state_tx);
        tokio::spawn(actor.run());

        Ok((
            Self {
                commands: command_tx,
                audio: audio_tx,
                state: state_rx,
            },
            event_rx,
        ))
    }

    /// Open the connection and wait for the handshake to finish.
    ///
    /// Retries run inside this call; it only returns an error once the retry
    /// policy gives up. Fails with [`SessionError::Shutdown`] after
    /// [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> SessionResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Connect(reply))
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Close the connection for good. Idempotent.
    pub async fn disconnect(&self) {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Disconnect(reply)).is_err() {
            return;
        }
        let _ = response.await;
    }

    /// Send a microphone chunk. Dropped silently when not connected or when
    /// the socket is not keeping up.
    pub fn send_audio_chunk(&self, chunk: Bytes) {
        if !self.is_connected() {
            trace!("Dropping {} byte audio chunk while not connected", chunk.len());
            return;
        }
        enqueue_audio(&self.audio, chunk);
    }

    /// Send a completed user text turn.
    ///
    /// Queued while a reconnect is in progress; fails with
    /// [`SessionError::NotConnected`] when idle or closed.
    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Text(text.into(), reply))
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Non-blocking hand-off to the actor. Returns whether the chunk was queued.
fn enqueue_audio(audio: &mpsc::Sender<Bytes>, chunk: Bytes) -> bool {
    match audio.try_send(chunk) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(chunk)) => {
            trace!("Audio queue full, dropping {} byte chunk", chunk.len());
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

// =============================================================================
// Actor
// =============================================================================

struct Dialed {
    socket: WsStream,
    model: String,
}

/// Where the single connection currently is. Timers live inside the variant
/// they belong to, so replacing the variant cancels them.
enum Link {
    Idle,
    Dialing {
        kind: AttemptKind,
        handle: Option<String>,
        dial: BoxFuture<'static, SessionResult<Dialed>>,
        deadline: std::pin::Pin<Box<Sleep>>,
    },
    AwaitingSetup {
        kind: AttemptKind,
        socket: WsStream,
        sent_handle: bool,
        opened_at: Instant,
        deadline: std::pin::Pin<Box<Sleep>>,
        proactive_at: Option<Instant>,
    },
    Live {
        socket: WsStream,
        opened_at: Instant,
        proactive: Option<std::pin::Pin<Box<Sleep>>>,
    },
    Waiting {
        kind: AttemptKind,
        timer: std::pin::Pin<Box<Sleep>>,
    },
    Closed,
}

impl Link {
    fn socket_mut(&mut self) -> Option<&mut WsStream> {
        match self {
            Link::AwaitingSetup { socket, .. } | Link::Live { socket, .. } => Some(socket),
            _ => None,
        }
    }

    fn into_socket(self) -> Option<WsStream> {
        match self {
            Link::AwaitingSetup { socket, .. } | Link::Live { socket, .. } => Some(socket),
            _ => None,
        }
    }

    fn has_socket(&self) -> bool {
        matches!(self, Link::AwaitingSetup { .. } | Link::Live { .. })
    }

    fn is_reconnecting(&self) -> bool {
        matches!(
            self,
            Link::Dialing { .. } | Link::AwaitingSetup { .. } | Link::Waiting { .. }
        )
    }
}

enum Activity {
    Dialed(SessionResult<Dialed>),
    HandshakeTimeout,
    Frame(Option<Result<Message, tungstenite::Error>>),
    RetryDue(AttemptKind),
    RotateDue,
}

/// Wait for whatever the current link variant is waiting on.
async fn next_activity(link: &mut Link) -> Activity {
    match link {
        Link::Dialing { dial, deadline, .. } => tokio::select! {
            result = dial => Activity::Dialed(result),
            _ = deadline.as_mut() => Activity::HandshakeTimeout,
        },
        Link::AwaitingSetup {
            socket, deadline, ..
        } => tokio::select! {
            frame = socket.next() => Activity::Frame(frame),
            _ = deadline.as_mut() => Activity::HandshakeTimeout,
        },
        Link::Live {
            socket, proactive, ..
        } => tokio::select! {
            frame = socket.next() => Activity::Frame(frame),
            _ = async {
                match proactive {
                    Some(timer) => timer.as_mut().await,
                    None => std::future::pending().await,
                }
            } => Activity::RotateDue,
        },
        Link::Waiting { kind, timer } => {
            timer.as_mut().await;
            Activity::RetryDue(*kind)
        }
        Link::Idle | Link::Closed => std::future::pending().await,
    }
}

struct ConnectionActor {
    config: LiveConfig,
    input_mime_type: String,
    credentials: Arc<dyn CredentialProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
    audio: mpsc::Receiver<Bytes>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    policy: RetryPolicy,
    token: Option<String>,
    link: Link,
    intentional: bool,
    pending_connects: Vec<oneshot::Sender<SessionResult<()>>>,
    queued_text: Vec<String>,
}

impl ConnectionActor {
    fn new(
        config: LiveConfig,
        credentials: Arc<dyn CredentialProvider>,
        commands: mpsc::UnboundedReceiver<Command>,
        audio: mpsc::Receiver<Bytes>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            input_mime_type: config.input_mime_type(),
            policy: RetryPolicy::from_config(&config),
            config,
            credentials,
            commands,
            audio,
            events,
            state,
            token: None,
            link: Link::Idle,
            intentional: false,
            pending_connects: Vec::new(),
            queued_text: Vec::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(chunk) = self.audio.recv() => self.on_audio(chunk).await,
                activity = next_activity(&mut self.link) => self.handle_activity(activity).await,
            }
        }
        debug!("Live connection actor stopped");
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.on_connect(reply),
            Command::Disconnect(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Command::Text(text, reply) => {
                let result = self.on_text(text).await;
                let _ = reply.send(result);
            }
        }
    }

    fn on_connect(&mut self, reply: oneshot::Sender<SessionResult<()>>) {
        if self.intentional {
            let _ = reply.send(Err(SessionError::Shutdown));
            return;
        }
        match self.link {
            Link::Live { .. } => {
                let _ = reply.send(Ok(()));
            }
            Link::Dialing { .. } | Link::AwaitingSetup { .. } | Link::Waiting { .. } => {
                self.pending_connects.push(reply);
            }
            Link::Idle | Link::Closed => {
                self.pending_connects.push(reply);
                self.policy.reset();
                let kind = if self.token.is_some() {
                    AttemptKind::Resume
                } else {
                    AttemptKind::Fresh
                };
                self.begin_attempt(kind);
            }
        }
    }

    async fn on_audio(&mut self, chunk: Bytes) {
        let Link::Live { socket, .. } = &mut self.link else {
            trace!("Dropping audio chunk while not connected");
            return;
        };
        let message = ClientMessage::audio(&chunk, &self.input_mime_type);
        if let Err(e) = send_json(socket, &message).await {
            warn!("Failed to send audio chunk: {}", e);
        }
    }

    async fn on_text(&mut self, text: String) -> SessionResult<()> {
        if let Link::Live { socket, .. } = &mut self.link {
            return send_json(socket, &ClientMessage::user_text(&text)).await;
        }
        if self.link.is_reconnecting() {
            debug!("Queueing text turn until the connection is ready");
            self.queued_text.push(text);
            return Ok(());
        }
        Err(SessionError::NotConnected)
    }

    async fn flush_queued_text(&mut self) {
        let texts = std::mem::take(&mut self.queued_text);
        for text in texts {
            let Link::Live { socket, .. } = &mut self.link else {
                return;
            };
            if let Err(e) = send_json(socket, &ClientMessage::user_text(&text)).await {
                warn!("Failed to flush queued text turn: {}", e);
            }
        }
    }

    /// Intentional, sticky close.
    async fn shutdown(&mut self) {
        if !self.intentional {
            info!("Disconnecting Live session");
        }
        self.intentional = true;
        self.token = None;
        self.queued_text.clear();

        let link = std::mem::replace(&mut self.link, Link::Closed);
        if let Some(socket) = link.into_socket() {
            close_socket(socket, "client disconnect").await;
        }

        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(SessionError::Shutdown));
        }

        if *self.state.borrow() != ConnectionState::Error {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    // -------------------------------------------------------------------------
    // Attempts
    // -------------------------------------------------------------------------

    fn begin_attempt(&mut self, kind: AttemptKind) {
        if self.intentional {
            return;
        }

        let handle = match kind {
            AttemptKind::Resume => self.token.clone(),
            AttemptKind::Fresh => None,
        };
        let kind = if handle.is_some() {
            AttemptKind::Resume
        } else {
            AttemptKind::Fresh
        };

        info!(?kind, "Opening Live connection");
        self.set_state(ConnectionState::Connecting);

        let dial = Box::pin(dial(self.config.clone(), Arc::clone(&self.credentials)));
        self.link = Link::Dialing {
            kind,
            handle,
            dial,
            deadline: Box::pin(sleep(self.config.connect_timeout())),
        };
    }

    fn schedule_retry(&mut self, kind: AttemptKind, delay: std::time::Duration) {
        self.set_state(ConnectionState::Connecting);
        self.link = Link::Waiting {
            kind,
            timer: Box::pin(sleep(delay)),
        };
    }

    fn handle_handshake_failure(&mut self, kind: AttemptKind, err: SessionError) {
        if self.intentional {
            return;
        }
        if err.is_auth() {
            error!("Live handshake rejected credentials: {}", err);
            self.credentials.invalidate();
            self.fail(err);
            return;
        }
        if matches!(
            err,
            SessionError::ProtocolParse(_) | SessionError::InvalidConfiguration(_)
        ) {
            self.fail(err);
            return;
        }

        match self.policy.on_handshake_failed(kind, &mut self.token) {
            NextStep::Retry { kind: next, delay } => {
                warn!(
                    failed = ?kind,
                    next = ?next,
                    delay_ms = delay.as_millis() as u64,
                    "Live handshake failed: {}",
                    err
                );
                self.schedule_retry(next, delay);
            }
            NextStep::Fatal => {
                error!("Live handshake failed, no retries left: {}", err);
                self.fail(err);
            }
        }
    }

    /// Terminal failure: drop everything and report.
    fn fail(&mut self, err: SessionError) {
        self.link = Link::Idle;
        if !self.queued_text.is_empty() {
            warn!("Discarding {} queued text turn(s)", self.queued_text.len());
            self.queued_text.clear();
        }
        self.set_state(ConnectionState::Error);
        self.emit(ConnectionEvent::Fatal(err.clone()));
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Err(err.clone()));
        }
    }

    /// Client-side rotation onto a new connection with the held token.
    async fn rotate(&mut self, reason: &str) {
        if self.intentional || self.token.is_none() {
            if let Link::Live { proactive, .. } = &mut self.link {
                *proactive = None;
            }
            return;
        }
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Live { socket, .. } => {
                info!(reason, "Rotating Live connection");
                close_socket(socket, "rotating connection").await;
                self.begin_attempt(AttemptKind::Resume);
            }
            other => self.link = other,
        }
    }

    // -------------------------------------------------------------------------
    // Link activity
    // -------------------------------------------------------------------------

    async fn handle_activity(&mut self, activity: Activity) {
        match activity {
            Activity::Dialed(result) => self.on_dialed(result).await,
            Activity::HandshakeTimeout => {
                let err = SessionError::ConnectTimeout(self.config.connect_timeout());
                if let Some(kind) = self.abandon_attempt() {
                    self.handle_handshake_failure(kind, err);
                }
            }
            Activity::Frame(frame) => self.on_frame(frame).await,
            Activity::RetryDue(kind) => self.begin_attempt(kind),
            Activity::RotateDue => self.rotate("connection lifetime limit approaching").await,
        }
    }

    /// Drop an in-flight handshake, returning its kind.
    fn abandon_attempt(&mut self) -> Option<AttemptKind> {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Dialing { kind, .. } | Link::AwaitingSetup { kind, .. } => Some(kind),
            other => {
                self.link = other;
                None
            }
        }
    }

    async fn on_dialed(&mut self, result: SessionResult<Dialed>) {
        let Link::Dialing {
            kind,
            handle,
            deadline,
            ..
        } = std::mem::replace(&mut self.link, Link::Idle)
        else {
            return;
        };

        let Dialed { mut socket, model } = match result {
            Ok(dialed) => dialed,
            Err(e) => {
                self.handle_handshake_failure(kind, e);
                return;
            }
        };

        let setup = ClientMessage::setup(&self.config, &model, handle.as_deref());
        if let Err(e) = send_json(&mut socket, &setup).await {
            self.handle_handshake_failure(kind, e);
            return;
        }

        debug!(%model, resuming = handle.is_some(), "Sent setup, awaiting setupComplete");
        self.link = Link::AwaitingSetup {
            kind,
            socket,
            sent_handle: handle.is_some(),
            opened_at: Instant::now(),
            deadline,
            proactive_at: None,
        };
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            None => {
                self.on_socket_lost(SessionError::TransientSocket(
                    "connection closed without a close frame".to_string(),
                ));
            }
            Some(Err(e)) => {
                self.on_socket_lost(SessionError::TransientSocket(e.to_string()));
            }
            Some(Ok(Message::Text(text))) => self.on_payload(text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => self.on_payload(text).await,
                Err(_) => {
                    error!("Received binary frame that is not UTF-8 JSON");
                    self.fail(SessionError::ProtocolParse(
                        "binary frame is not valid UTF-8".to_string(),
                    ));
                }
            },
            Some(Ok(Message::Ping(data))) => {
                if let Some(socket) = self.link.socket_mut() {
                    if let Err(e) = socket.send(Message::Pong(data)).await {
                        warn!("Failed to answer ping: {}", e);
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => self.on_close_frame(frame),
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
        }
    }

    fn on_close_frame(&mut self, frame: Option<CloseFrame>) {
        let code = frame.as_ref().map(|f| u16::from(f.code));
        let reason = frame
            .as_ref()
            .map(|f| f.reason.as_str().to_string())
            .unwrap_or_default();

        match classify_close(code, &reason) {
            CloseKind::Auth => {
                error!(?code, %reason, "Server closed the connection over credentials");
                self.link = Link::Idle;
                self.credentials.invalidate();
                self.fail(SessionError::Auth(reason));
            }
            CloseKind::Normal if matches!(self.link, Link::Live { .. }) => {
                info!(%reason, "Server closed the Live connection normally");
                self.link = Link::Idle;
                self.set_state(ConnectionState::Disconnected);
                self.emit(ConnectionEvent::Closed);
            }
            _ => {
                self.on_socket_lost(SessionError::TransientSocket(format!(
                    "closed by server (code {}): {}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
                    reason
                )));
            }
        }
    }

    fn on_socket_lost(&mut self, err: SessionError) {
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::AwaitingSetup { kind, .. } => self.handle_handshake_failure(kind, err),
            Link::Live { .. } => {
                if self.intentional {
                    return;
                }
                match self.policy.on_connection_lost(self.token.is_some()) {
                    NextStep::Retry { kind, delay } => {
                        warn!(
                            ?kind,
                            delay_ms = delay.as_millis() as u64,
                            "Live connection lost: {}",
                            err
                        );
                        self.schedule_retry(kind, delay);
                    }
                    NextStep::Fatal => {
                        error!("Live connection lost, no retries left: {}", err);
                        self.fail(err);
                    }
                }
            }
            other => self.link = other,
        }
    }

    async fn on_payload(&mut self, text: &str) {
        let events = match parse_server_message(text) {
            Ok(events) => events,
            Err(msg) => {
                error!("{}", msg);
                self.fail(SessionError::ProtocolParse(msg));
                return;
            }
        };

        for event in events {
            if !self.link.has_socket() {
                break;
            }
            self.on_server_event(event).await;
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SetupComplete => self.on_setup_complete().await,
            ServerEvent::ResumptionUpdate {
                new_handle,
                resumable,
            } => self.on_resumption_update(new_handle, resumable),
            ServerEvent::Audio(chunk) => self.emit(ConnectionEvent::AudioChunk(chunk)),
            ServerEvent::InputTranscription(text) => {
                self.emit(ConnectionEvent::InputTranscription(text))
            }
            ServerEvent::OutputTranscription(text) => {
                self.emit(ConnectionEvent::OutputTranscription(text))
            }
            ServerEvent::Interrupted => self.emit(ConnectionEvent::Interrupted),
            ServerEvent::GenerationComplete => self.emit(ConnectionEvent::GenerationComplete),
            ServerEvent::TurnComplete => self.emit(ConnectionEvent::TurnComplete),
            ServerEvent::GoAway { time_left } => {
                warn!(?time_left, "Server announced goAway");
                if self.token.is_some() {
                    self.rotate("server sent goAway").await;
                }
            }
            ServerEvent::Error {
                code,
                status,
                message,
            } => self.on_server_error(SessionError::from_server(code, status, message)),
        }
    }

    async fn on_setup_complete(&mut self) {
        let (kind, socket, sent_handle, opened_at, proactive_at) =
            match std::mem::replace(&mut self.link, Link::Idle) {
                Link::AwaitingSetup {
                    kind,
                    socket,
                    sent_handle,
                    opened_at,
                    proactive_at,
                    ..
                } => (kind, socket, sent_handle, opened_at, proactive_at),
                other => {
                    self.link = other;
                    debug!("Ignoring setupComplete outside of a handshake");
                    return;
                }
            };

        self.link = Link::Live {
            socket,
            opened_at,
            proactive: proactive_at.map(|at| Box::pin(sleep_until(at.into()))),
        };
        self.policy.on_setup_complete(kind);
        self.set_state(ConnectionState::Connected);
        info!(resumed = sent_handle, "Live session ready");

        self.emit(if sent_handle {
            ConnectionEvent::Resumed
        } else {
            ConnectionEvent::SetupComplete
        });
        for reply in self.pending_connects.drain(..) {
            let _ = reply.send(Ok(()));
        }
        self.flush_queued_text().await;
    }

    fn on_resumption_update(&mut self, new_handle: Option<String>, resumable: Option<bool>) {
        if !capture_token(&mut self.token, new_handle, resumable) {
            debug!(?resumable, "Resumption update without a usable handle");
            return;
        }
        debug!("Stored new resumption handle");

        let after = self.config.proactive_reconnect_after();
        match &mut self.link {
            Link::AwaitingSetup {
                opened_at,
                proactive_at,
                ..
            } => *proactive_at = Some(proactive_deadline(*opened_at, after)),
            Link::Live {
                opened_at,
                proactive,
                ..
            } => {
                let at = proactive_deadline(*opened_at, after);
                *proactive = Some(Box::pin(sleep_until(at.into())));
            }
            _ => {}
        }
    }

    fn on_server_error(&mut self, err: SessionError) {
        if err.is_auth() {
            error!("Server rejected credentials: {}", err);
            self.credentials.invalidate();
            self.fail(err);
            return;
        }
        match self.abandon_attempt() {
            Some(kind) => self.handle_handshake_failure(kind, err),
            None => {
                error!("Server error on live connection: {}", err);
                self.fail(err);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn set_state(&self, new_state: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            debug!(from = %state, to = %new_state, "Connection state changed");
            *state = new_state;
            true
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

/// Fetch credentials and open the socket.
async fn dial(config: LiveConfig, credentials: Arc<dyn CredentialProvider>) -> SessionResult<Dialed> {
    let creds = credentials.get_credentials().await?;
    let model = creds.model_or(&config.model).to_string();
    let url = config
        .build_websocket_url(creds.api_key.as_str())
        .map_err(SessionError::InvalidConfiguration)?;

    let (socket, _response) = connect_async(url.as_str())
        .await
        .map_err(classify_connect_error)?;
    Ok(Dialed { socket, model })
}

fn classify_connect_error(err: tungstenite::Error) -> SessionError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status().as_u16();
        let message = format!("WebSocket upgrade rejected with HTTP {status}");
        return if status == 401 || status == 403 {
            SessionError::Auth(message)
        } else {
            SessionError::TransientSocket(message)
        };
    }
    SessionError::TransientSocket(err.to_string())
}

async fn send_json(socket: &mut WsStream, message: &ClientMessage) -> SessionResult<()> {
    let json = message
        .to_json()
        .map_err(|e| SessionError::ProtocolParse(format!("failed to serialize message: {e}")))?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| SessionError::TransientSocket(e.to_string()))
}

async fn close_socket(mut socket: WsStream, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    };
    if let Err(e) = socket.close(Some(frame)).await {
        debug!("Error while closing socket: {}", e);
    }
}
