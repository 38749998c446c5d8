//! Speech service abstraction.
//!
//! The session only knows two operations: turn an utterance into text, and
//! turn text into a stream of linear-16 PCM. Both are blocking calls made
//! from the processing loop, so implementations must be `Send + Sync` and
//! are shared across calls behind `Arc`.

#[cfg(feature = "deepgram")]
pub mod deepgram;
pub mod stub;

#[cfg(feature = "deepgram")]
pub use deepgram::{DeepgramConfig, DeepgramService};

use std::io::Read;
use std::sync::Arc;

use crate::error::Result;

/// Synthesized PCM, readable as it arrives from the service.
pub type SynthesizedAudio = Box<dyn Read + Send>;

/// Speech-to-text backend.
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance of linear-16 PCM in the call's format.
    ///
    /// # Errors
    /// `CallError::TranscriptionFailure` on a non-success response or a
    /// network error. Implementations do not retry.
    fn transcribe(&self, pcm: &[u8]) -> Result<String>;
}

/// Text-to-speech backend.
pub trait Synthesizer: Send + Sync {
    /// # Errors
    /// `CallError::SynthesisFailure` on a non-success response or a network
    /// error. Implementations do not retry.
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio>;
}

/// The pair of backends a session talks to.
#[derive(Clone)]
pub struct CallServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl CallServices {
    pub fn new<T, S>(transcriber: T, synthesizer: S) -> Self
    where
        T: Transcriber + 'static,
        S: Synthesizer + 'static,
    {
        Self {
            transcriber: Arc::new(transcriber),
            synthesizer: Arc::new(synthesizer),
        }
    }
}

impl std::fmt::Debug for CallServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallServices").finish_non_exhaustive()
    }
}
