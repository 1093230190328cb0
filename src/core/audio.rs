//! Audio I/O boundary: inbound playback sink, level metering and candidate
//! recording.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::realtime::{SessionError, SessionResult};

/// Scale factor for converting i16 PCM to normalized f32 (-1.0 to 1.0).
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Microphone chunks buffered ahead of the recording writer.
const RECORDING_QUEUE_CAPACITY: usize = 256;

/// Receives model audio for playback.
///
/// Called from the session event loop; implementations should hand the chunk
/// off quickly (e.g. push into a playback queue).
pub trait AudioSink: Send + Sync {
    /// PCM16LE mono chunk at the output sample rate.
    fn deliver_inbound_chunk(&self, chunk: Bytes);

    /// RMS level of the chunk just delivered, in `[0, 1]`.
    fn on_output_energy(&self, _energy: f32) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn deliver_inbound_chunk(&self, _chunk: Bytes) {}
}

/// RMS energy of PCM 16-bit little-endian samples.
///
/// Returns 0.0 for chunks shorter than one sample. A trailing odd byte is
/// ignored.
pub fn pcm16_rms_energy(audio_data: &[u8]) -> f32 {
    if audio_data.len() < 2 {
        return 0.0;
    }

    let mut sum_squares = 0.0f32;
    let sample_count = audio_data.len() / 2;

    for chunk in audio_data.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * PCM_TO_FLOAT_SCALE;
        sum_squares += sample * sample;
    }

    (sum_squares / sample_count as f32).sqrt().min(1.0)
}

/// WAV recorder for the candidate's microphone stream (PCM16 mono).
pub struct SessionRecorder {
    path: PathBuf,
    sample_rate: u32,
    writer: Mutex<Option<hound::WavWriter<BufWriter<File>>>>,
    samples_written: Mutex<u64>,
    /// Low byte of a sample split across two chunks.
    carry: Mutex<Option<u8>>,
}

impl SessionRecorder {
    /// Create (or truncate) the WAV file at `path`.
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> SessionResult<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            SessionError::Recording(format!("failed to create {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), sample_rate, "Recording candidate audio");

        Ok(Self {
            path,
            sample_rate,
            writer: Mutex::new(Some(writer)),
            samples_written: Mutex::new(0),
            carry: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        *self.samples_written.lock()
    }

    /// Recorded duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.samples_written() * 1000 / u64::from(self.sample_rate.max(1))
    }

    /// Append a PCM16LE chunk. Ignored after [`finalize`](Self::finalize).
    ///
    /// Chunk boundaries need not fall on sample boundaries: a trailing odd
    /// byte is held and joined with the first byte of the next chunk.
    pub fn write_chunk(&self, pcm: &[u8]) -> SessionResult<()> {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };
        let mut carry = self.carry.lock();

        let mut count = 0u64;
        let mut rest = pcm;
        if let Some(low) = *carry {
            let Some((&high, tail)) = rest.split_first() else {
                return Ok(());
            };
            writer
                .write_sample(i16::from_le_bytes([low, high]))
                .map_err(|e| SessionError::Recording(e.to_string()))?;
            *carry = None;
            count += 1;
            rest = tail;
        }

        let samples = rest.chunks_exact(2);
        let remainder = samples.remainder();
        for chunk in samples {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(|e| SessionError::Recording(e.to_string()))?;
            count += 1;
        }
        *carry = remainder.first().copied();
        *self.samples_written.lock() += count;
        Ok(())
    }

    /// Flush the header and close the file. Idempotent; returns the path on
    /// the call that actually finalized.
    pub fn finalize(&self) -> SessionResult<Option<PathBuf>> {
        let Some(writer) = self.writer.lock().take() else {
            return Ok(None);
        };
        if self.carry.lock().take().is_some() {
            debug!("Discarding incomplete trailing sample");
        }
        writer
            .finalize()
            .map_err(|e| SessionError::Recording(format!("failed to finalize recording: {e}")))?;
        info!(
            path = %self.path.display(),
            duration_ms = self.duration_ms(),
            "Recording finalized"
        );
        Ok(Some(self.path.clone()))
    }
}

/// Runs a [`SessionRecorder`] on a blocking writer thread.
///
/// [`push`](Self::push) never touches the file, so it is safe to call from
/// async code. Chunks are dropped with a warning when the writer falls
/// behind by more than the queue capacity.
pub struct RecordingWriter {
    recorder: Arc<SessionRecorder>,
    chunks: Mutex<Option<mpsc::Sender<Bytes>>>,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RecordingWriter {
    /// Start the writer thread. Must be called from within a Tokio runtime.
    pub fn spawn(recorder: SessionRecorder) -> Self {
        let recorder = Arc::new(recorder);
        let (tx, mut rx) = mpsc::channel::<Bytes>(RECORDING_QUEUE_CAPACITY);

        let target = Arc::clone(&recorder);
        let writer = tokio::task::spawn_blocking(move || {
            while let Some(chunk) = rx.blocking_recv() {
                if let Err(e) = target.write_chunk(&chunk) {
                    warn!("Failed to record audio chunk: {}", e);
                }
            }
        });

        Self {
            recorder,
            chunks: Mutex::new(Some(tx)),
            writer: tokio::sync::Mutex::new(Some(writer)),
        }
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    /// Queue a chunk for the writer. Ignored after [`finish`](Self::finish).
    pub fn push(&self, chunk: Bytes) {
        let guard = self.chunks.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(chunk)) = tx.try_send(chunk) {
            warn!("Recording queue full, dropping {} byte chunk", chunk.len());
        }
    }

    /// Drain queued chunks, then finalize the file. Idempotent; returns the
    /// path on the call that actually finalized.
    pub async fn finish(&self) -> SessionResult<Option<PathBuf>> {
        drop(self.chunks.lock().take());
        // Held until finalized so a concurrent caller cannot finalize while
        // the writer is still draining.
        let mut writer = self.writer.lock().await;
        if let Some(handle) = writer.take() {
            if let Err(e) = handle.await {
                warn!("Recording writer panicked: {}", e);
            }
        }

        let recorder = Arc::clone(&self.recorder);
        tokio::task::spawn_blocking(move || recorder.finalize())
            .await
            .map_err(|e| SessionError::Recording(format!("finalizer panicked: {e}")))?
    }
}
