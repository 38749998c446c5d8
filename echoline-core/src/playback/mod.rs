//! Real-time paced playback of synthesized audio.
//!
//! Synthesized speech arrives much faster than real time. Writing it to the
//! line in one burst overruns the peer's jitter buffer, so the pacer slices
//! the stream into capture-sized frames and releases frame *n* no earlier
//! than `start + n × frame_duration`. Deadlines are absolute, so sleep
//! overshoot does not accumulate across an utterance.
//!
//! The stream is consumed progressively: the first frame goes out as soon as
//! its bytes have arrived, without waiting for the rest of the response.

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::audio::AudioFormat;
use crate::error::{CallError, Result};
use crate::transport::AudioSink;

/// Outcome of one completed playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    pub frames: usize,
    pub bytes: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackPacer {
    format: AudioFormat,
}

impl PlaybackPacer {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }

    /// Delay between two full frames.
    pub fn frame_interval(&self) -> Duration {
        self.format.frame_duration()
    }

    /// Stream `audio` to `sink` at line rate. Returns once the last frame's
    /// playback time has elapsed.
    ///
    /// # Errors
    /// - `CallError::SynthesisFailure` if reading `audio` fails.
    /// - `CallError::PlaybackWriteFailure` if the sink rejects a frame.
    ///
    /// Either error aborts the rest of this playback only.
    pub fn play(&self, audio: &mut dyn Read, sink: &mut dyn AudioSink) -> Result<PlaybackReport> {
        let frame_bytes = self.format.frame_bytes;
        let mut frame = vec![0u8; frame_bytes];
        let start = Instant::now();
        let mut due = start;
        let mut frames = 0usize;
        let mut bytes = 0usize;

        loop {
            let filled = fill_frame(audio, &mut frame).map_err(|e| {
                CallError::SynthesisFailure(format!(
                    "audio stream failed after {frames} frames: {e}"
                ))
            })?;
            if filled == 0 {
                break;
            }

            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            } else {
                // A stalled stream must not be followed by a catch-up burst.
                due = now;
            }

            sink.write_audio(&frame[..filled])
                .map_err(|e| CallError::PlaybackWriteFailure {
                    frames_written: frames,
                    reason: e.to_string(),
                })?;
            frames += 1;
            bytes += filled;
            due += self.format.duration_of(filled);

            if filled < frame_bytes {
                break;
            }
        }

        // Hold until the final (possibly partial) frame has played out.
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }

        let report = PlaybackReport {
            frames,
            bytes,
            elapsed: start.elapsed(),
        };
        debug!(
            frames,
            bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "playback complete"
        );
        Ok(report)
    }
}

/// Read until `frame` is full or the stream ends. Returns bytes filled.
fn fill_frame(audio: &mut dyn Read, frame: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < frame.len() {
        match audio.read(&mut frame[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
