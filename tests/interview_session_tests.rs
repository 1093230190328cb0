//! Interview session tests against a scripted Live server

mod mock_providers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use interview_voice::core::audio::{AudioSink, NullAudioSink};
use interview_voice::core::credentials::StaticCredentialProvider;
use interview_voice::core::interview::{
    CommitTrigger, EndReason, InterviewConfig, InterviewSession, SessionSnapshot, TurnCommit,
};
use interview_voice::core::realtime::{ConnectionState, LiveConfig, TranscriptRole};
use mock_providers::live_mock::{
    LiveMockServer, Step, input_transcription, model_audio, output_transcription,
    resumption_update, setup_complete, turn_complete,
};

const KICKOFF: &str = "Hello, I'm ready to begin the interview.";
const WRAP_UP: &str = "Please wrap up now.";

fn live_config(server: &LiveMockServer) -> LiveConfig {
    LiveConfig {
        connect_timeout_ms: 1_000,
        initial_retry_delay_ms: 20,
        resume_retry_delay_ms: 20,
        ..LiveConfig::default().with_url(server.url())
    }
}

fn interview_config() -> InterviewConfig {
    InterviewConfig {
        kickoff_text: KICKOFF.to_string(),
        wrap_up_phrase: WRAP_UP.to_string(),
        ..Default::default()
    }
}

fn new_session(
    server: &LiveMockServer,
    config: InterviewConfig,
    sink: Arc<dyn AudioSink>,
) -> (InterviewSession, UnboundedReceiver<TurnCommit>) {
    InterviewSession::new(
        config,
        live_config(server),
        StaticCredentialProvider::shared("test-key", None),
        sink,
    )
    .unwrap()
}

async fn next_commit(commits: &mut UnboundedReceiver<TurnCommit>) -> TurnCommit {
    timeout(Duration::from_secs(5), commits.recv())
        .await
        .expect("timed out waiting for commit")
        .expect("commit channel closed")
}

async fn wait_for_end(session: &InterviewSession, limit: Duration) -> SessionSnapshot {
    let mut snapshots = session.subscribe();
    let snapshot = timeout(limit, snapshots.wait_for(|s| s.ended.is_some()))
        .await
        .expect("session should end on its own")
        .unwrap()
        .clone();
    snapshot
}

async fn wait_until(limit: Duration, condition: impl Fn() -> bool) {
    timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Default)]
struct CountingSink {
    chunks: AtomicUsize,
    bytes: AtomicUsize,
}

impl AudioSink for CountingSink {
    fn deliver_inbound_chunk(&self, chunk: Bytes) {
        self.chunks.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(chunk.len(), Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_kickoff_and_turn_commits() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        Step::Send(output_transcription("Welcome. ")),
        Step::Send(output_transcription("Tell me about yourself?")),
        Step::Send(turn_complete()),
        Step::Send(input_transcription("I build ")),
        Step::Send(input_transcription("compilers.")),
        Step::Send(output_transcription("Interesting.")),
        Step::Send(turn_complete()),
        Step::Hold,
    ]])
    .await;

    let (session, mut commits) = new_session(&server, interview_config(), Arc::new(NullAudioSink));
    session.start().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    let first = next_commit(&mut commits).await;
    assert_eq!(first.trigger, CommitTrigger::TurnComplete);
    assert_eq!(first.entries.len(), 1);
    assert_eq!(first.entries[0].role, TranscriptRole::Assistant);
    assert_eq!(first.entries[0].text, "Welcome. Tell me about yourself?");

    let second = next_commit(&mut commits).await;
    let texts: Vec<_> = second
        .entries
        .iter()
        .map(|e| (e.role, e.text.as_str()))
        .collect();
    assert_eq!(
        texts,
        vec![
            (TranscriptRole::User, "I build compilers."),
            (TranscriptRole::Assistant, "Interesting."),
        ]
    );

    let summary = session.stop().await;
    assert_eq!(summary.ended, Some(EndReason::Stopped));
    assert_eq!(summary.transcript.len(), 3);
    assert_eq!(summary.question_count, 1);
    assert!(!summary.wrap_up_sent);
    assert_eq!(server.client_texts(), vec![KICKOFF.to_string()]);
}

#[tokio::test]
async fn test_kickoff_not_resent_after_resume() {
    let server = LiveMockServer::start(vec![
        vec![
            Step::ExpectSetup,
            Step::Send(setup_complete()),
            Step::Send(resumption_update("T", true)),
            Step::ExpectClientContent,
            Step::Drop,
        ],
        vec![Step::ExpectSetup, Step::Send(setup_complete()), Step::Hold],
    ])
    .await;

    let (session, _commits) = new_session(&server, interview_config(), Arc::new(NullAudioSink));
    session.start().await.unwrap();

    wait_until(Duration::from_secs(5), || server.setups().len() == 2).await;
    let mut state = session.subscribe();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.connection_state == ConnectionState::Connected),
    )
    .await
    .expect("session should reconnect")
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.setup_handle(1).as_deref(), Some("T"));
    assert_eq!(server.client_texts(), vec![KICKOFF.to_string()]);

    let summary = session.stop().await;
    assert_eq!(summary.ended, Some(EndReason::Stopped));
}

#[tokio::test]
async fn test_watchdog_commits_stalled_turn() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        Step::Send(output_transcription("So, where were we")),
        Step::Hold,
    ]])
    .await;

    let config = InterviewConfig {
        watchdog_timeout_ms: 200,
        watchdog_tick_ms: 50,
        ..interview_config()
    };
    let (session, mut commits) = new_session(&server, config, Arc::new(NullAudioSink));
    session.start().await.unwrap();

    let commit = next_commit(&mut commits).await;
    assert_eq!(commit.trigger, CommitTrigger::Watchdog);
    assert_eq!(commit.entries[0].text, "So, where were we");

    session.stop().await;
}

#[tokio::test]
async fn test_wrap_up_completed_ends_session() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        Step::ExpectClientContent,
        Step::Send(output_transcription("Thank you for your time, goodbye.")),
        Step::Send(turn_complete()),
        Step::Hold,
    ]])
    .await;

    let config = InterviewConfig {
        duration_secs: 3,
        wrap_up_lead_secs: 2,
        wrap_up_fallback_secs: 10,
        ..interview_config()
    };
    let (session, _commits) = new_session(&server, config, Arc::new(NullAudioSink));
    session.start().await.unwrap();

    let ended = wait_for_end(&session, Duration::from_secs(5)).await;
    assert_eq!(ended.ended, Some(EndReason::WrapUpCompleted));
    assert!(ended.wrap_up_sent);
    assert_eq!(
        server.client_texts(),
        vec![KICKOFF.to_string(), WRAP_UP.to_string()]
    );

    let summary = session.stop().await;
    assert_eq!(summary, ended);
    assert!(session.is_stopped());
}

#[tokio::test]
async fn test_wrap_up_fallback_ends_silent_session() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::Hold,
    ]])
    .await;

    let config = InterviewConfig {
        duration_secs: 3,
        wrap_up_lead_secs: 2,
        wrap_up_fallback_secs: 1,
        ..interview_config()
    };
    let (session, _commits) = new_session(&server, config, Arc::new(NullAudioSink));
    session.start().await.unwrap();

    let ended = wait_for_end(&session, Duration::from_secs(6)).await;
    assert_eq!(ended.ended, Some(EndReason::WrapUpFallback));
    assert!(ended.wrap_up_sent);
}

#[tokio::test]
async fn test_server_close_flushes_pending_text() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        Step::Send(output_transcription("That concludes our interview.")),
        Step::Sleep(Duration::from_millis(30)),
        Step::Close {
            code: 1000,
            reason: "done".to_string(),
        },
    ]])
    .await;

    let (session, mut commits) = new_session(&server, interview_config(), Arc::new(NullAudioSink));
    session.start().await.unwrap();

    let ended = wait_for_end(&session, Duration::from_secs(5)).await;
    assert_eq!(ended.ended, Some(EndReason::ConnectionClosed));
    assert_eq!(ended.transcript.len(), 1);
    assert_eq!(ended.transcript[0].text, "That concludes our interview.");

    let commit = next_commit(&mut commits).await;
    assert_eq!(commit.trigger, CommitTrigger::SessionEnd);
}

#[tokio::test]
async fn test_concurrent_stop_shares_teardown() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        Step::Send(output_transcription("First question?")),
        Step::Hold,
    ]])
    .await;

    let (session, _commits) = new_session(&server, interview_config(), Arc::new(NullAudioSink));
    session.start().await.unwrap();
    wait_until(Duration::from_secs(5), || {
        !session.snapshot().pending_assistant.is_empty()
    })
    .await;

    let other = session.clone();
    let (a, b) = tokio::join!(session.stop(), other.stop());
    assert_eq!(a, b);
    assert_eq!(a.ended, Some(EndReason::Stopped));
    assert_eq!(a.transcript.len(), 1);
    assert!(a.pending_assistant.is_empty());
    assert_eq!(a.connection_state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_concurrent_start_waits_for_first_handshake() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Sleep(Duration::from_millis(150)),
        Step::Send(setup_complete()),
        Step::Hold,
    ]])
    .await;

    let (session, _commits) = new_session(&server, interview_config(), Arc::new(NullAudioSink));
    let other = session.clone();
    let (a, b) = tokio::join!(session.start(), other.start());
    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(session.start().await, Ok(()));

    wait_until(Duration::from_secs(5), || !server.client_texts().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.client_texts(), vec![KICKOFF.to_string()]);
    assert_eq!(server.connection_count(), 1);

    session.stop().await;
}

#[tokio::test]
async fn test_audio_flows_both_ways_and_is_recorded() {
    let server = LiveMockServer::start(vec![vec![
        Step::ExpectSetup,
        Step::Send(setup_complete()),
        Step::ExpectClientContent,
        // Four bytes of silence
        Step::Send(model_audio("AAAAAA==")),
        Step::Hold,
    ]])
    .await;

    let temp_dir = tempfile::TempDir::new().unwrap();
    let recording = temp_dir.path().join("candidate.wav");
    let config = InterviewConfig {
        recording_path: Some(recording.clone()),
        ..interview_config()
    };
    let sink = Arc::new(CountingSink::default());
    let (session, _commits) = new_session(&server, config, sink.clone());
    session.start().await.unwrap();

    for _ in 0..3 {
        session.push_audio(Bytes::from(vec![0u8; 320]));
    }

    wait_until(Duration::from_secs(5), || {
        server.audio_frame_count() == 3 && sink.chunks.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(sink.bytes.load(Ordering::SeqCst), 4);

    session.stop().await;

    let reader = hound::WavReader::open(&recording).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.len(), 480);
}
