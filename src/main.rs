use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use interview_voice::{
    AppConfig, InterviewSession, NullAudioSink, SessionSnapshot, TurnCommit,
};

/// Interview voice client - runs one timed interview against the Live API
#[derive(Parser, Debug)]
#[command(name = "interview-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Raw PCM16LE mono file streamed as the candidate's microphone
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: Option<PathBuf>,

    /// Microphone chunk length in milliseconds
    #[arg(long = "chunk-ms", default_value_t = 100)]
    chunk_ms: u64,

    /// Send chunks as fast as possible instead of in real time
    #[arg(long = "no-pacing")]
    no_pacing: bool,

    /// Write the final transcript as JSON
    #[arg(short = 'o', long = "transcript", value_name = "FILE")]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Must be installed before the first TLS handshake
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    if cli.chunk_ms == 0 {
        anyhow::bail!("--chunk-ms must be greater than zero");
    }

    let config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    let credentials = config.credential_provider()?;
    let input_sample_rate = config.live.input_sample_rate;
    let (session, mut commits) = InterviewSession::new(
        config.interview,
        config.live,
        credentials,
        Arc::new(NullAudioSink),
    )?;

    session.start().await?;
    info!("Interview started");

    let streamer = cli.input.clone().map(|path| {
        let session = session.clone();
        let pace = (!cli.no_pacing).then(|| Duration::from_millis(cli.chunk_ms));
        let chunk_bytes = chunk_size_bytes(input_sample_rate, cli.chunk_ms);
        tokio::spawn(async move {
            if let Err(e) = stream_pcm_file(&session, path, chunk_bytes, pace).await {
                warn!("Microphone stream stopped: {}", e);
            }
        })
    });

    let mut snapshots = session.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping interview");
                break;
            }
            Some(commit) = commits.recv() => print_commit(&commit),
            changed = snapshots.changed() => {
                if changed.is_err() || snapshots.borrow().ended.is_some() {
                    break;
                }
            }
        }
    }

    if let Some(handle) = streamer {
        handle.abort();
    }

    let summary = session.stop().await;
    while let Ok(commit) = commits.try_recv() {
        print_commit(&commit);
    }
    report(&summary);

    if let Some(path) = cli.transcript {
        let json = serde_json::to_string_pretty(&summary)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| anyhow!("Failed to write transcript to {}: {}", path.display(), e))?;
        info!("Transcript written to {}", path.display());
    }

    Ok(())
}

fn chunk_size_bytes(sample_rate: u32, chunk_ms: u64) -> usize {
    // 16-bit mono, rounded to whole samples
    let samples = (u64::from(sample_rate) * chunk_ms / 1000).max(1);
    (samples * 2) as usize
}

async fn stream_pcm_file(
    session: &InterviewSession,
    path: PathBuf,
    chunk_bytes: usize,
    pace: Option<Duration>,
) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?;
    let mut ticker = pace.map(tokio::time::interval);
    let mut buf = vec![0u8; chunk_bytes];

    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            info!("Microphone input exhausted");
            return Ok(());
        }
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }
        session.push_audio(Bytes::copy_from_slice(&buf[..filled]));
    }
}

fn print_commit(commit: &TurnCommit) {
    for entry in &commit.entries {
        println!("[{}] {}", entry.role, entry.text);
    }
}

fn report(summary: &SessionSnapshot) {
    let reason = summary
        .ended
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "Interview ended ({}) after {}s: {} entries, {} questions",
        reason,
        summary.elapsed_ms / 1000,
        summary.transcript.len(),
        summary.question_count
    );
    if let Some(error) = &summary.error {
        println!("Error: {error}");
    }
}
