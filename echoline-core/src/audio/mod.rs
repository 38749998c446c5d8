//! Line audio format and loudness measurement.
//!
//! Call audio arrives already decoded as signed 16-bit little-endian PCM
//! ("slin"). Every duration the engine reasons about (chunk length, minimum
//! speech, trailing silence, playback frame interval) is derived from one
//! `AudioFormat`, so the capture and playback sides always agree on what a
//! byte count means in time.

pub mod volume;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};

/// Telephony default: 8 kHz narrowband.
pub const DEFAULT_SAMPLE_RATE: u32 = 8_000;
/// 20 ms of 16-bit mono audio at 8 kHz.
pub const DEFAULT_FRAME_BYTES: usize = 320;

/// PCM layout shared by the capture and playback paths of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    /// Samples per second per channel (Hz).
    pub sample_rate: u32,
    /// Interleaved channel count. Telephony lines are mono.
    pub channels: u16,
    /// Bytes per sample per channel. Only 2 (linear-16) is supported.
    pub sample_width: u16,
    /// Nominal bytes per transport read and per playback write.
    pub frame_bytes: usize,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            sample_width: 2,
            frame_bytes: DEFAULT_FRAME_BYTES,
        }
    }
}

impl AudioFormat {
    /// Bytes consumed by one second of audio.
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * self.sample_width as u64
    }

    /// Bytes in one interleaved sample frame (all channels).
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    /// Number of bytes covering `duration`, rounded down to whole samples.
    pub fn bytes_for(&self, duration: Duration) -> u64 {
        let raw = self.bytes_per_second() as u128 * duration.as_micros() / 1_000_000;
        let align = self.block_align().max(1) as u128;
        ((raw / align) * align) as u64
    }

    /// Playback time represented by `bytes`.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((bytes as u128 * 1_000_000_000 / bps as u128) as u64)
    }

    /// Duration of one nominal frame; also the playback inter-frame delay.
    pub fn frame_duration(&self) -> Duration {
        self.duration_of(self.frame_bytes)
    }

    /// Reject layouts the engine cannot process.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CallError::Config("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(CallError::Config("channel count must be non-zero".into()));
        }
        if self.sample_width != 2 {
            return Err(CallError::Config(format!(
                "sample width {} is unsupported (linear-16 only)",
                self.sample_width
            )));
        }
        if self.frame_bytes == 0 || self.frame_bytes % self.block_align() != 0 {
            return Err(CallError::Config(format!(
                "frame size {} is not a whole number of {}-byte samples",
                self.frame_bytes,
                self.block_align()
            )));
        }
        Ok(())
    }
}
