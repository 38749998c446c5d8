use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Per-call counters, shared by the capture and processing loops.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub chunks_in: AtomicUsize,
    pub invalid_chunks: AtomicUsize,
    pub segments_emitted: AtomicUsize,
    pub segments_discarded: AtomicUsize,
    /// Successful transcriptions.
    pub transcriptions: AtomicUsize,
    pub transcription_failures: AtomicUsize,
    /// Successful synthesis requests (playback may still fail).
    pub syntheses: AtomicUsize,
    pub synthesis_failures: AtomicUsize,
    pub frames_written: AtomicUsize,
    pub playback_aborts: AtomicUsize,
}

impl SessionDiagnostics {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            invalid_chunks: self.invalid_chunks.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
            transcriptions: self.transcriptions.load(Ordering::Relaxed),
            transcription_failures: self.transcription_failures.load(Ordering::Relaxed),
            syntheses: self.syntheses.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            playback_aborts: self.playback_aborts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub invalid_chunks: usize,
    pub segments_emitted: usize,
    pub segments_discarded: usize,
    pub transcriptions: usize,
    pub transcription_failures: usize,
    pub syntheses: usize,
    pub synthesis_failures: usize,
    pub frames_written: usize,
    pub playback_aborts: usize,
}
