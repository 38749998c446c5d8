//! Typed utterance handed from the segmenter to the processing loop.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// One detected utterance: linear-16 PCM from the first loud chunk through
/// the last loud chunk, interior pauses included.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Per-call sequence number, in finalize order starting at 0.
    pub seq: u64,
    /// Raw PCM bytes in the call's `AudioFormat`.
    pub audio: Vec<u8>,
    /// Wall-clock time at which speech onset was observed.
    pub started_at: DateTime<Utc>,
    /// Media-clock offset of the onset from the start of the call.
    pub offset: Duration,
}

impl SpeechSegment {
    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
    }
}
