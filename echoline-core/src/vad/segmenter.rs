//! Energy-gated utterance segmenter.
//!
//! ## Algorithm (per chunk)
//!
//! 1. Measure the chunk's mean absolute amplitude.
//! 2. Loud chunk: record onset if this is the first one, buffer it, clear
//!    any silence timer → `Armed`.
//! 3. Quiet chunk before onset: dropped.
//! 4. Quiet chunk after onset: buffered. Once `min_speech` has elapsed since
//!    onset, the first quiet chunk starts the silence timer
//!    (`ArmedTrailingSilence`); a quiet chunk that finds the timer running
//!    for at least `silence` finalizes the attempt.
//! 5. Finalize trims the trailing quiet run and emits the voiced span if it
//!    covers at least `min_speech`, otherwise discards it. Back to `Idle`.
//!
//! Time is the media clock: each accepted chunk advances the position by its
//! own length in bytes. Thresholds are pre-converted to bytes so every
//! comparison is exact integer arithmetic.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{SegmenterState, VadConfig};
use crate::audio::{volume::VolumeMeter, AudioFormat};
use crate::buffering::SpeechSegment;
use crate::error::{CallError, Result};

/// Result of feeding one chunk.
#[derive(Debug)]
pub enum PushOutcome {
    /// Nothing finalized yet.
    Pending,
    /// An utterance was finalized and meets the minimum length.
    Segment(SpeechSegment),
    /// An attempt was finalized but its voiced span was too short.
    Discarded { voiced_bytes: usize },
}

pub struct SpeechSegmenter {
    format: AudioFormat,
    threshold: f32,
    min_speech_bytes: u64,
    silence_bytes: u64,
    max_utterance_bytes: Option<u64>,

    state: SegmenterState,
    buffer: Vec<u8>,
    /// Buffer length just after the most recent loud chunk.
    voiced_len: usize,
    /// Media clock, in bytes consumed since the call started.
    position: u64,
    speech_start: Option<u64>,
    silence_start: Option<u64>,
    onset_position: u64,
    started_at: Option<DateTime<Utc>>,
    next_seq: u64,
}

impl SpeechSegmenter {
    pub fn new(format: AudioFormat, config: &VadConfig) -> Self {
        Self {
            format,
            threshold: config.volume_threshold,
            min_speech_bytes: format.bytes_for(config.min_speech),
            silence_bytes: format.bytes_for(config.silence),
            max_utterance_bytes: config.max_utterance.map(|d| format.bytes_for(d)),
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            voiced_len: 0,
            position: 0,
            speech_start: None,
            silence_start: None,
            onset_position: 0,
            started_at: None,
            next_seq: 0,
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Bytes buffered in the current attempt.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one transport chunk.
    ///
    /// # Errors
    /// - `CallError::InvalidChunk`: the chunk was rejected; state, buffer and
    ///   media clock are unchanged and the next chunk may be pushed.
    /// - `CallError::TransportDisconnect`: the segmenter has been stopped.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<PushOutcome> {
        if self.state == SegmenterState::Stopped {
            return Err(CallError::TransportDisconnect);
        }

        let volume = VolumeMeter::measure(chunk)?;
        self.position += chunk.len() as u64;
        let now = self.position;

        if volume > self.threshold {
            if self.speech_start.is_none() {
                self.speech_start = Some(now);
                self.onset_position = now - chunk.len() as u64;
                self.started_at = Some(Utc::now());
                debug!(
                    volume = format_args!("{:.1}", volume),
                    offset_ms = self.format.duration_of(self.onset_position as usize).as_millis() as u64,
                    "speech onset"
                );
            }
            self.buffer.extend_from_slice(chunk);
            self.voiced_len = self.buffer.len();
            self.silence_start = None;
            self.state = SegmenterState::Armed;
            return Ok(self.check_max_length());
        }

        let Some(speech_start) = self.speech_start else {
            return Ok(PushOutcome::Pending);
        };
        self.buffer.extend_from_slice(chunk);

        if now - speech_start >= self.min_speech_bytes {
            match self.silence_start {
                None => {
                    self.silence_start = Some(now);
                    self.state = SegmenterState::ArmedTrailingSilence;
                }
                Some(since) if now - since >= self.silence_bytes => {
                    return Ok(self.finalize());
                }
                Some(_) => {}
            }
        }

        Ok(self.check_max_length())
    }

    /// The call ended: drop the in-progress attempt and refuse further input.
    ///
    /// Returns the number of buffered bytes that were discarded.
    pub fn disconnect(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.reset_attempt();
        self.state = SegmenterState::Stopped;
        discarded
    }

    fn check_max_length(&mut self) -> PushOutcome {
        match self.max_utterance_bytes {
            Some(max) if self.buffer.len() as u64 >= max => {
                warn!(
                    buffered = self.buffer.len(),
                    "max utterance length reached — forcing finalize"
                );
                self.finalize()
            }
            _ => PushOutcome::Pending,
        }
    }

    fn finalize(&mut self) -> PushOutcome {
        let mut audio = std::mem::take(&mut self.buffer);
        audio.truncate(self.voiced_len);
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let offset = self.format.duration_of(self.onset_position as usize);
        self.reset_attempt();

        if (audio.len() as u64) < self.min_speech_bytes {
            debug!(
                voiced_bytes = audio.len(),
                min_bytes = self.min_speech_bytes,
                "speech too short — discarding attempt"
            );
            return PushOutcome::Discarded {
                voiced_bytes: audio.len(),
            };
        }

        let segment = SpeechSegment {
            seq: self.next_seq,
            audio,
            started_at,
            offset,
        };
        self.next_seq += 1;
        PushOutcome::Segment(segment)
    }

    fn reset_attempt(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.voiced_len = 0;
        self.speech_start = None;
        self.silence_start = None;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use byteorder::{ByteOrder, LittleEndian};

    const LOUD: i16 = 1_000;
    const QUIET: i16 = 10;

    /// 20 ms at 8 kHz mono: 160 samples alternating ±amplitude.
    fn chunk(amplitude: i16) -> Vec<u8> {
        let samples: Vec<i16> = (0..160)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        let mut out = vec![0u8; samples.len() * 2];
        LittleEndian::write_i16_into(&samples, &mut out);
        out
    }

    fn segmenter() -> SpeechSegmenter {
        SpeechSegmenter::new(AudioFormat::default(), &VadConfig::default())
    }

    /// Feed `count` chunks of `amplitude`, collecting emitted segments and
    /// discarded attempts.
    fn feed(
        seg: &mut SpeechSegmenter,
        amplitude: i16,
        count: usize,
        emitted: &mut Vec<SpeechSegment>,
        discarded: &mut Vec<usize>,
    ) {
        let c = chunk(amplitude);
        for _ in 0..count {
            match seg.push_chunk(&c).expect("valid chunk") {
                PushOutcome::Pending => {}
                PushOutcome::Segment(s) => emitted.push(s),
                PushOutcome::Discarded { voiced_bytes } => discarded.push(voiced_bytes),
            }
        }
    }

    #[test]
    fn quiet_stream_never_emits() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);
        for amplitude in [0, 5, 29, 30] {
            feed(&mut seg, amplitude, 200, &mut emitted, &mut discarded);
        }
        assert!(emitted.is_empty());
        assert!(discarded.is_empty());
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert_eq!(seg.buffered_bytes(), 0);
    }

    #[test]
    fn sustained_speech_then_silence_emits_one_segment() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 30, &mut emitted, &mut discarded);
        assert_eq!(seg.state(), SegmenterState::Armed);
        feed(&mut seg, QUIET, 80, &mut emitted, &mut discarded);

        assert_eq!(emitted.len(), 1);
        assert!(discarded.is_empty());
        assert_eq!(emitted[0].len(), 30 * 320);
        assert_eq!(emitted[0].seq, 0);
        assert_eq!(emitted[0].offset, Duration::ZERO);
        assert_eq!(emitted[0].audio, chunk(LOUD).repeat(30));
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn finalize_happens_exactly_when_silence_elapses() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 30, &mut emitted, &mut discarded);
        // The first quiet chunk starts the timer; 75 more cover 1.5 s.
        feed(&mut seg, QUIET, 75, &mut emitted, &mut discarded);
        assert!(emitted.is_empty());
        assert_eq!(seg.state(), SegmenterState::ArmedTrailingSilence);

        feed(&mut seg, QUIET, 1, &mut emitted, &mut discarded);
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn short_burst_is_discarded() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 10, &mut emitted, &mut discarded);
        feed(&mut seg, QUIET, 500, &mut emitted, &mut discarded);

        assert!(emitted.is_empty());
        assert_eq!(discarded, vec![10 * 320]);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn early_dip_does_not_start_the_silence_timer() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 5, &mut emitted, &mut discarded);
        feed(&mut seg, QUIET, 10, &mut emitted, &mut discarded);
        assert_eq!(seg.state(), SegmenterState::Armed);
    }

    #[test]
    fn short_pause_keeps_speech_in_one_segment() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 30, &mut emitted, &mut discarded);
        feed(&mut seg, QUIET, 40, &mut emitted, &mut discarded);
        feed(&mut seg, LOUD, 30, &mut emitted, &mut discarded);
        assert_eq!(seg.state(), SegmenterState::Armed);
        feed(&mut seg, QUIET, 80, &mut emitted, &mut discarded);

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), (30 + 40 + 30) * 320);
    }

    #[test]
    fn consecutive_utterances_are_numbered_in_order() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, QUIET, 10, &mut emitted, &mut discarded);
        feed(&mut seg, LOUD, 30, &mut emitted, &mut discarded);
        feed(&mut seg, QUIET, 80, &mut emitted, &mut discarded);
        feed(&mut seg, LOUD, 40, &mut emitted, &mut discarded);
        feed(&mut seg, QUIET, 80, &mut emitted, &mut discarded);

        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].seq, 0);
        assert_eq!(emitted[1].seq, 1);
        assert_eq!(emitted[0].offset, Duration::from_millis(200));
        // 10 + 30 + 80 chunks of 20 ms precede the second onset.
        assert_eq!(emitted[1].offset, Duration::from_millis(2400));
        assert_eq!(emitted[1].len(), 40 * 320);
    }

    #[test]
    fn max_utterance_forces_finalize() {
        let cfg = VadConfig {
            max_utterance: Some(Duration::from_secs(1)),
            ..VadConfig::default()
        };
        let mut seg = SpeechSegmenter::new(AudioFormat::default(), &cfg);
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 60, &mut emitted, &mut discarded);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), 50 * 320);
        assert_eq!(seg.buffered_bytes(), 10 * 320);
    }

    #[test]
    fn invalid_chunk_is_rejected_without_disturbing_state() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 3, &mut emitted, &mut discarded);
        let before = seg.buffered_bytes();

        let err = seg.push_chunk(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CallError::InvalidChunk { len: 3 }));
        assert_eq!(seg.buffered_bytes(), before);
        assert_eq!(seg.state(), SegmenterState::Armed);

        feed(&mut seg, LOUD, 1, &mut emitted, &mut discarded);
        assert_eq!(seg.buffered_bytes(), before + 320);
    }

    #[test]
    fn disconnect_mid_utterance_discards_and_stops() {
        let mut seg = segmenter();
        let (mut emitted, mut discarded) = (vec![], vec![]);

        feed(&mut seg, LOUD, 20, &mut emitted, &mut discarded);
        assert_eq!(seg.disconnect(), 20 * 320);
        assert_eq!(seg.state(), SegmenterState::Stopped);
        assert_eq!(seg.buffered_bytes(), 0);

        let err = seg.push_chunk(&chunk(LOUD)).unwrap_err();
        assert!(matches!(err, CallError::TransportDisconnect));
        // Even a malformed chunk reports the disconnect, not InvalidChunk.
        let err = seg.push_chunk(&[0u8; 3]).unwrap_err();
        assert!(err.is_disconnect());
        assert!(emitted.is_empty());
    }
}
