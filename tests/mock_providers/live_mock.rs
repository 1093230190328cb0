//! Scripted Live API WebSocket server
//!
//! Each accepted connection runs the next script in order. Connections beyond
//! the last script complete the handshake and then hold the socket open.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

/// One scripted server action.
#[derive(Debug, Clone)]
pub enum Step {
    /// Read until the client's setup message arrives and record it
    ExpectSetup,
    /// Read until a `clientContent` message arrives
    ExpectClientContent,
    /// Send a JSON frame
    Send(Value),
    /// Pause
    Sleep(Duration),
    /// Send a close frame and drain the socket
    Close { code: u16, reason: String },
    /// Drop the TCP stream without a close frame
    Drop,
    /// Keep reading until the client goes away
    Hold,
}

/// Recorded client traffic.
#[derive(Debug, Default)]
pub struct Recorded {
    /// `setup` payloads, one per connection that sent one
    pub setups: Vec<Value>,
    /// Every text frame, tagged with its connection index
    pub messages: Vec<(usize, Value)>,
}

pub struct LiveMockServer {
    addr: std::net::SocketAddr,
    connections: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
}

impl LiveMockServer {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");

        let connections = Arc::new(AtomicUsize::new(0));
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let scripts = Arc::new(scripts);

        let accept_connections = Arc::clone(&connections);
        let accept_recorded = Arc::clone(&recorded);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accept_connections.fetch_add(1, Ordering::SeqCst);
                let script = scripts
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold]);
                let recorded = Arc::clone(&accept_recorded);
                tokio::spawn(async move {
                    if let Err(e) = run_script(stream, index, script, recorded).await {
                        eprintln!("mock connection {index} ended: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            recorded,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/live", self.addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> Vec<Value> {
        self.recorded.lock().setups.clone()
    }

    /// Resumption handle presented in the setup of connection `index`.
    pub fn setup_handle(&self, index: usize) -> Option<String> {
        self.recorded
            .lock()
            .setups
            .get(index)
            .and_then(|s| s.pointer("/sessionResumption/handle"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Text turns the client sent, across all connections.
    pub fn client_texts(&self) -> Vec<String> {
        self.recorded
            .lock()
            .messages
            .iter()
            .filter_map(|(_, msg)| msg.pointer("/clientContent/turns/0/parts/0/text"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Number of `realtimeInput` audio frames received.
    pub fn audio_frame_count(&self) -> usize {
        self.recorded
            .lock()
            .messages
            .iter()
            .filter(|(_, msg)| msg.get("realtimeInput").is_some())
            .count()
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;

async fn run_script(
    stream: TcpStream,
    index: usize,
    script: Vec<Step>,
    recorded: Arc<Mutex<Recorded>>,
) -> Result<(), Error> {
    let mut ws = accept_async(stream).await?;

    for step in script {
        match step {
            Step::ExpectSetup => {
                let msg = read_until(&mut ws, index, &recorded, |m| m.get("setup").is_some())
                    .await?;
                if let Some(setup) = msg.and_then(|m| m.get("setup").cloned()) {
                    recorded.lock().setups.push(setup);
                }
            }
            Step::ExpectClientContent => {
                read_until(&mut ws, index, &recorded, |m| m.get("clientContent").is_some())
                    .await?;
            }
            Step::Send(value) => {
                ws.send(Message::Text(value.to_string().into())).await?;
            }
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
            Step::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                ws.close(Some(frame)).await?;
                while let Some(Ok(_)) = ws.next().await {}
                return Ok(());
            }
            Step::Drop => return Ok(()),
            Step::Hold => {
                read_until(&mut ws, index, &recorded, |_| false).await?;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Read and record frames until one matches. Returns `None` when the client
/// went away first.
async fn read_until(
    ws: &mut WebSocketStream<TcpStream>,
    index: usize,
    recorded: &Arc<Mutex<Recorded>>,
    matches: impl Fn(&Value) -> bool,
) -> Result<Option<Value>, Error> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let value: Value = serde_json::from_str(text.as_str())?;
                recorded.lock().messages.push((index, value.clone()));
                if matches(&value) {
                    return Ok(Some(value));
                }
            }
            Ok(Message::Ping(data)) => ws.send(Message::Pong(data)).await?,
            Ok(Message::Close(_)) => return Ok(None),
            Ok(_) => {}
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

// =============================================================================
// Server frame builders
// =============================================================================

pub fn setup_complete() -> Value {
    json!({ "setupComplete": {} })
}

pub fn resumption_update(handle: &str, resumable: bool) -> Value {
    json!({
        "sessionResumptionUpdate": { "newHandle": handle, "resumable": resumable }
    })
}

pub fn input_transcription(text: &str) -> Value {
    json!({ "serverContent": { "inputTranscription": { "text": text } } })
}

pub fn output_transcription(text: &str) -> Value {
    json!({ "serverContent": { "outputTranscription": { "text": text } } })
}

pub fn model_audio(base64_pcm: &str) -> Value {
    json!({
        "serverContent": {
            "modelTurn": {
                "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": base64_pcm } }]
            }
        }
    })
}

pub fn turn_complete() -> Value {
    json!({ "serverContent": { "turnComplete": true } })
}

pub fn interrupted() -> Value {
    json!({ "serverContent": { "interrupted": true } })
}

pub fn go_away() -> Value {
    json!({ "goAway": { "timeLeft": "10s" } })
}

pub fn server_error(code: i64, status: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "status": status, "message": message } })
}
