pub mod audio;
pub mod credentials;
pub mod interview;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{AudioSink, NullAudioSink, SessionRecorder, pcm16_rms_energy};
pub use credentials::{
    CredentialProvider, Credentials, HttpCredentialProvider, StaticCredentialProvider,
};
pub use interview::{
    ChatPhase, CommitTrigger, EndReason, InterviewConfig, InterviewSession, SessionSnapshot,
    TranscriptEntry, TurnCommit,
};
pub use realtime::{
    ConnectionEvent, ConnectionState, LiveConfig, LiveConnection, SessionError, SessionResult,
    TranscriptRole,
};
