use thiserror::Error;

/// All errors produced by echoline-core.
#[derive(Debug, Error)]
pub enum CallError {
    /// The caller hung up. Ends the session cleanly; not a fault.
    #[error("caller disconnected")]
    TransportDisconnect,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid audio chunk: {len} bytes is not a whole number of 16-bit samples")]
    InvalidChunk { len: usize },

    #[error("transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("playback write failed after {frames_written} frames: {reason}")]
    PlaybackWriteFailure { frames_written: usize, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CallError {
    /// `true` when the error only means the call is over.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CallError::TransportDisconnect)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
