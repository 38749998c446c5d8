//! Voice activity detection and utterance segmentation.
//!
//! The [`SpeechSegmenter`] is a driven state machine: feed it one chunk at a
//! time with [`SpeechSegmenter::push_chunk`] and it reports when an
//! utterance has been finalized or discarded. The capture loop drives it from
//! a blocking transport read, but nothing in the segmenter blocks or reads
//! the clock for its decisions, so it can equally be fed from a callback or
//! from recorded audio.

pub mod segmenter;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use segmenter::{PushOutcome, SpeechSegmenter};

use crate::error::{CallError, Result};

/// Thresholds that decide where an utterance starts and ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadConfig {
    /// Mean absolute sample value a chunk must exceed to count as speech.
    pub volume_threshold: f32,
    /// Speech must run this long before trailing silence is timed at all.
    /// Also the minimum voiced length of an emitted segment.
    pub min_speech: Duration,
    /// Sustained silence that ends an utterance.
    pub silence: Duration,
    /// Force a finalize once the buffered utterance reaches this length.
    pub max_utterance: Option<Duration>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 30.0,
            min_speech: Duration::from_millis(500),
            silence: Duration::from_millis(1500),
            max_utterance: Some(Duration::from_secs(30)),
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.volume_threshold.is_finite() || self.volume_threshold < 0.0 {
            return Err(CallError::Config(format!(
                "volume threshold {} must be a non-negative number",
                self.volume_threshold
            )));
        }
        if self.min_speech.is_zero() {
            return Err(CallError::Config("minimum speech duration must be positive".into()));
        }
        if self.silence.is_zero() {
            return Err(CallError::Config("silence duration must be positive".into()));
        }
        if let Some(max) = self.max_utterance {
            if max < self.min_speech {
                return Err(CallError::Config(format!(
                    "max utterance {max:?} is shorter than minimum speech {:?}",
                    self.min_speech
                )));
            }
        }
        Ok(())
    }
}

/// Segmenter state, evaluated once per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmenterState {
    /// No speech in the current attempt; quiet chunks are dropped.
    Idle,
    /// Speech detected and still loud (or within the minimum-speech window).
    Armed,
    /// Speech detected, silence timer running.
    ArmedTrailingSilence,
    /// The call ended. Terminal.
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(VadConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_durations_and_negative_threshold() {
        let mut cfg = VadConfig::default();
        cfg.silence = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = VadConfig::default();
        cfg.volume_threshold = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = VadConfig::default();
        cfg.max_utterance = Some(Duration::from_millis(100));
        assert!(cfg.validate().is_err());
    }
}
