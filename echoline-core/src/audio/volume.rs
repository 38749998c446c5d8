//! Mean-absolute-amplitude loudness meter for linear-16 chunks.
//!
//! The metric is expressed in raw sample units (0–32768), so a threshold of
//! `30.0` means "average magnitude above 30 LSB". Chunks that are empty or
//! end in half a sample are rejected rather than mis-decoded.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{CallError, Result};

/// Stateless loudness meter.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeMeter;

impl VolumeMeter {
    /// Mean of `|sample|` over every 16-bit sample in `chunk`.
    ///
    /// # Errors
    /// `CallError::InvalidChunk` if `chunk` holds no full sample or has an
    /// odd byte length.
    pub fn measure(chunk: &[u8]) -> Result<f32> {
        if chunk.len() < 2 || chunk.len() % 2 != 0 {
            return Err(CallError::InvalidChunk { len: chunk.len() });
        }

        let count = chunk.len() / 2;
        let sum: u64 = chunk
            .chunks_exact(2)
            .map(|b| (LittleEndian::read_i16(b) as i32).unsigned_abs() as u64)
            .sum();

        Ok((sum as f64 / count as f64) as f32)
    }
}
