//! Offline stand-ins for the speech services.
//!
//! Lets the whole call path (segmentation → hand-off → pacing) run without
//! credentials: every utterance is "transcribed" to a description of its
//! size, and every reply is a short tone whose length follows the text.

use std::f32::consts::TAU;
use std::io::Cursor;
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use super::{SynthesizedAudio, Synthesizer, Transcriber};
use crate::audio::AudioFormat;
use crate::error::Result;

/// Reports the utterance length instead of recognising it.
#[derive(Debug, Clone, Copy)]
pub struct StubTranscriber {
    format: AudioFormat,
}

impl StubTranscriber {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(&self, pcm: &[u8]) -> Result<String> {
        let ms = self.format.duration_of(pcm.len()).as_millis();
        debug!(bytes = pcm.len(), "stub transcribe");
        Ok(format!("[stub: {ms} ms of speech]"))
    }
}

/// Replies with a 440 Hz tone, 40 ms per character, capped at 3 s.
#[derive(Debug, Clone, Copy)]
pub struct ToneSynthesizer {
    format: AudioFormat,
}

const TONE_HZ: f32 = 440.0;
const TONE_AMPLITUDE: f32 = 4_000.0;
const MS_PER_CHAR: u64 = 40;
const MAX_TONE: Duration = Duration::from_secs(3);

impl ToneSynthesizer {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    fn render(&self, duration: Duration) -> Vec<u8> {
        let bytes = self.format.bytes_for(duration) as usize;
        let samples = bytes / self.format.block_align();
        let mut out = Vec::with_capacity(bytes);
        for i in 0..samples {
            let t = i as f32 / self.format.sample_rate as f32;
            let value = ((TAU * TONE_HZ * t).sin() * TONE_AMPLITUDE) as i16;
            for _ in 0..self.format.channels {
                // Writing into a Vec cannot fail.
                let _ = out.write_i16::<LittleEndian>(value);
            }
        }
        out
    }
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let chars = text.chars().count() as u64;
        let duration = Duration::from_millis(chars * MS_PER_CHAR).min(MAX_TONE);
        Ok(Box::new(Cursor::new(self.render(duration))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    #[test]
    fn stub_transcript_reports_duration() {
        let t = StubTranscriber::new(AudioFormat::default());
        assert_eq!(t.transcribe(&[0u8; 16_000]).unwrap(), "[stub: 1000 ms of speech]");
    }

    #[test]
    fn tone_length_follows_text_and_is_capped() {
        let s = ToneSynthesizer::new(AudioFormat::default());

        let mut short = Vec::new();
        s.synthesize("hello").unwrap().read_to_end(&mut short).unwrap();
        // 5 chars × 40 ms = 200 ms = 3200 bytes at 8 kHz mono.
        assert_eq!(short.len(), 3_200);
        assert!(short.iter().any(|&b| b != 0));

        let mut long = Vec::new();
        s.synthesize(&"x".repeat(1_000))
            .unwrap()
            .read_to_end(&mut long)
            .unwrap();
        assert_eq!(long.len(), 48_000);
    }
}
