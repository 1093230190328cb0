//! Live connection manager tests against a scripted WebSocket server

mod mock_providers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use interview_voice::core::credentials::{CredentialProvider, Credentials};
use interview_voice::core::realtime::{
    ConnectionEvent, ConnectionState, LiveConfig, LiveConnection, SessionError, SessionResult,
};
use mock_providers::live_mock::{
    LiveMockServer, Step, go_away, output_transcription, resumption_update, server_error,
    setup_complete, turn_complete,
};

/// Static key that counts fetches and invalidations.
#[derive(Default)]
struct CountingProvider {
    fetches: AtomicUsize,
    invalidations: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn get_credentials(&self) -> SessionResult<Credentials> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Credentials::new("test-key", Some("models/test-model".to_string())))
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

fn test_config(server: &LiveMockServer) -> LiveConfig {
    LiveConfig {
        connect_timeout_ms: 400,
        initial_retry_delay_ms: 20,
        resume_retry_delay_ms: 20,
        ..LiveConfig::default().with_url(server.url())
    }
}

async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

/// Collect events until `stop` matches, skipping nothing.
async fn events_until(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    stop: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_setup_sends_configured_fields() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::Hold,
    ]])
    .await;

    let config = LiveConfig {
        system_instruction: Some("You are an interviewer.".to_string()),
        ..test_config(&server).with_voice("Kore")
    };
    let provider = Arc::new(CountingProvider::default());
    let (connection, mut events) = LiveConnection::new(config, provider.clone()).unwrap();

    connection.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);
    assert_eq!(connection.state(), ConnectionState::Connected);

    let setup = &server.setups()[0];
    assert_eq!(setup["model"], "models/test-model");
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );
    assert_eq!(
        setup["systemInstruction"]["parts"][0]["text"],
        "You are an interviewer."
    );
    assert!(setup["inputAudioTranscription"].is_object());
    assert!(setup["outputAudioTranscription"].is_object());
    assert!(server.setup_handle(0).is_none());
    assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_setup_timeout_retries_once_and_succeeds() {
    let server = LiveMockServer::start(vec![
        // Never acknowledges setup
        vec![Step::ExpectSetup, Step::Hold],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();

    timeout(Duration::from_secs(5), connection.connect())
        .await
        .expect("connect should finish")
        .unwrap();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);
    assert_eq!(server.connection_count(), 2);

    // No second SetupComplete trails behind
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());

    connection.disconnect().await;
}

#[tokio::test]
async fn test_unclean_close_resumes_with_token() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("T", true)),
            Step::Sleep(Duration::from_millis(50)),
            Step::Drop,
        ],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| *e == ConnectionEvent::Resumed).await;
    assert_eq!(seen, vec![ConnectionEvent::SetupComplete, ConnectionEvent::Resumed]);
    assert_eq!(server.setup_handle(1).as_deref(), Some("T"));
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_rejected_resume_falls_back_to_one_fresh_attempt() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("T", true)),
            Step::Sleep(Duration::from_millis(50)),
            Step::Drop,
        ],
        // Resume handshake rejected
        vec![
            Step::ExpectSetup,
            Step::Send(server_error(400, "INVALID_ARGUMENT", "session handle expired")),
            Step::Hold,
        ],
        // Fresh fallback drops before setupComplete
        vec![Step::ExpectSetup, Step::Drop],
    ])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| matches!(e, ConnectionEvent::Fatal(_))).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], ConnectionEvent::SetupComplete);
    assert_eq!(server.setup_handle(1).as_deref(), Some("T"));
    assert!(server.setup_handle(2).is_none());
    assert_eq!(server.connection_count(), 3);
    assert_eq!(connection.state(), ConnectionState::Error);

    // No further attempts after the fallback is spent
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 3);
}

#[tokio::test]
async fn test_resume_does_not_inherit_previous_rotation_timer() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("T", true)),
            Step::Sleep(Duration::from_millis(50)),
            Step::Drop,
        ],
        // No resumption update here, so this connection schedules no rotation
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let config = LiveConfig {
        connection_ceiling_secs: 1,
        proactive_reconnect_fraction: 0.5,
        ..test_config(&server)
    };
    let (connection, mut events) =
        LiveConnection::new(config, Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| *e == ConnectionEvent::Resumed).await;
    assert_eq!(seen, vec![ConnectionEvent::SetupComplete, ConnectionEvent::Resumed]);

    // Well past the first connection's 500ms rotation point
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(server.connection_count(), 2);
    assert!(events.try_recv().is_err());
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_non_resumable_update_is_ignored() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("X", false)),
            Step::Sleep(Duration::from_millis(50)),
            Step::Drop,
        ],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);
    // Fresh reconnect, not a resume
    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);
    assert!(server.setup_handle(1).is_none());

    connection.disconnect().await;
}

#[tokio::test]
async fn test_auth_close_is_fatal_and_invalidates() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Close {
            code: 1008,
            reason: "API key not valid. Please pass a valid API key.".to_string(),
        },
    ]])
    .await;

    let provider = Arc::new(CountingProvider::default());
    let (connection, mut events) =
        LiveConnection::new(test_config(&server), provider.clone()).unwrap();

    let result = timeout(Duration::from_secs(5), connection.connect())
        .await
        .expect("connect should finish");
    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Fatal(SessionError::Auth(_))
    ));
    assert_eq!(connection.state(), ConnectionState::Error);
    assert_eq!(provider.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_auth_error_message_is_fatal() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(server_error(403, "PERMISSION_DENIED", "Permission denied")),
        Step::Hold,
    ]])
    .await;

    let provider = Arc::new(CountingProvider::default());
    let (connection, _events) =
        LiveConnection::new(test_config(&server), provider.clone()).unwrap();

    let result = connection.connect().await;
    assert!(matches!(result, Err(SessionError::Auth(_))));
    assert_eq!(provider.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_handshake_server_error_retries_then_fatal() {
    let failing = vec![
        Step::ExpectSetup,
        Step::Send(server_error(500, "INTERNAL", "backend unavailable")),
        Step::Hold,
    ];
    let server = LiveMockServer::start(vec![failing.clone(), failing]).await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();

    let result = timeout(Duration::from_secs(5), connection.connect())
        .await
        .expect("connect should finish");
    assert!(matches!(
        result,
        Err(SessionError::ServerLogic { code: Some(500), .. })
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Fatal(SessionError::ServerLogic { .. })
    ));
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_normal_server_close_emits_closed() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::Send(output_transcription("Thank you for your time.")),
        Step::Send(turn_complete()),
        Step::Sleep(Duration::from_millis(30)),
        Step::Close {
            code: 1000,
            reason: "session ended".to_string(),
        },
    ]])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| *e == ConnectionEvent::Closed).await;
    assert_eq!(
        seen,
        vec![
            ConnectionEvent::SetupComplete,
            ConnectionEvent::OutputTranscription("Thank you for your time.".to_string()),
            ConnectionEvent::TurnComplete,
            ConnectionEvent::Closed,
        ]
    );
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_proactive_rotation_before_ceiling() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("R1", true)),
            Step::Hold,
        ],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let config = LiveConfig {
        connection_ceiling_secs: 1,
        proactive_reconnect_fraction: 0.2,
        ..test_config(&server)
    };
    let (connection, mut events) =
        LiveConnection::new(config, Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| *e == ConnectionEvent::Resumed).await;
    assert_eq!(seen, vec![ConnectionEvent::SetupComplete, ConnectionEvent::Resumed]);
    assert_eq!(server.setup_handle(1).as_deref(), Some("R1"));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_go_away_rotates_when_token_held() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("G", true)),
            Step::Send(go_away()),
            Step::Hold,
        ],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();

    let seen = events_until(&mut events, |e| *e == ConnectionEvent::Resumed).await;
    assert_eq!(seen, vec![ConnectionEvent::SetupComplete, ConnectionEvent::Resumed]);
    assert_eq!(server.setup_handle(1).as_deref(), Some("G"));

    connection.disconnect().await;
}

#[tokio::test]
async fn test_text_queued_during_reconnect_is_flushed() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("Q", true)),
            Step::Sleep(Duration::from_millis(30)),
            Step::Drop,
        ],
        vec![
            Step::ExpectSetup,
            Step::Sleep(Duration::from_millis(100)),
            Step::Send(setup_complete()),
            Step::ExpectClientContent,
            Step::Hold,
        ],
    ])
    .await;

    let config = LiveConfig {
        resume_retry_delay_ms: 50,
        ..test_config(&server)
    };
    let (connection, mut events) =
        LiveConnection::new(config, Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);

    // Wait until the drop is noticed
    let mut state = connection.subscribe_state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connecting),
    )
    .await
    .expect("reconnect should start")
    .unwrap();

    connection.send_text("Are you still there?").await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Resumed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.client_texts(), vec!["Are you still there?".to_string()]);

    connection.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_closes_and_is_sticky() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::Hold,
    ]])
    .await;

    let (connection, mut events) =
        LiveConnection::new(test_config(&server), Arc::new(CountingProvider::default())).unwrap();
    connection.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::SetupComplete);

    connection.disconnect().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connection.connect().await, Err(SessionError::Shutdown));
    assert_eq!(
        connection.send_text("late").await,
        Err(SessionError::NotConnected)
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);
}
