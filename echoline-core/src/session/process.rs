//! Processing loop: utterance queue → transcription → synthesis → pacer.
//!
//! Each utterance is handled to completion before the next is popped, so
//! replies are played back in the order the caller spoke. Any failure drops
//! the current utterance and moves on; nothing is retried.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use super::diagnostics::SessionDiagnostics;
use crate::buffering::{SpeechSegment, UtteranceConsumer};
use crate::error::CallError;
use crate::events::{CallEventKind, EventPublisher, FailureStage};
use crate::playback::PlaybackPacer;
use crate::services::CallServices;
use crate::transport::AudioSink;

pub(crate) struct ProcessLoop {
    pub consumer: UtteranceConsumer,
    pub sink: Box<dyn AudioSink>,
    pub services: CallServices,
    pub pacer: PlaybackPacer,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub events: EventPublisher,
}

impl ProcessLoop {
    pub fn run(mut self) {
        info!("processing started");
        while let Some(segment) = self.consumer.pop() {
            self.handle(segment);
        }

        let dropped = self.consumer.pending();
        if dropped > 0 {
            info!(dropped, "call ended with utterances still queued — dropping");
        }
        info!("processing stopped");
    }

    fn handle(&mut self, segment: SpeechSegment) {
        let span = info_span!("utterance", utterance = segment.seq);
        let _enter = span.enter();
        let utterance = segment.seq;
        debug!(bytes = segment.len(), "processing utterance");

        let text = match self.services.transcriber.transcribe(&segment.audio) {
            Ok(text) => {
                SessionDiagnostics::bump(&self.diagnostics.transcriptions);
                text
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.transcription_failures);
                self.fail(utterance, FailureStage::Transcription, &e);
                return;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            debug!("empty transcript — nothing to say");
            return;
        }
        info!(text, "transcript");
        self.events.publish(CallEventKind::Transcript {
            utterance,
            text: text.to_string(),
        });

        let mut audio = match self.services.synthesizer.synthesize(text) {
            Ok(audio) => {
                SessionDiagnostics::bump(&self.diagnostics.syntheses);
                audio
            }
            Err(e) => {
                SessionDiagnostics::bump(&self.diagnostics.synthesis_failures);
                self.fail(utterance, FailureStage::Synthesis, &e);
                return;
            }
        };

        match self.pacer.play(audio.as_mut(), self.sink.as_mut()) {
            Ok(report) => {
                self.diagnostics
                    .frames_written
                    .fetch_add(report.frames, Ordering::Relaxed);
                self.events.publish(CallEventKind::PlaybackFinished {
                    utterance,
                    frames: report.frames,
                    elapsed_ms: report.elapsed.as_millis() as u64,
                });
            }
            Err(e) => {
                if let CallError::PlaybackWriteFailure { frames_written, .. } = &e {
                    self.diagnostics
                        .frames_written
                        .fetch_add(*frames_written, Ordering::Relaxed);
                }
                SessionDiagnostics::bump(&self.diagnostics.playback_aborts);
                self.fail(utterance, FailureStage::Playback, &e);
            }
        }
    }

    fn fail(&self, utterance: u64, stage: FailureStage, error: &CallError) {
        warn!(?stage, error = %error, "utterance dropped");
        self.events.publish(CallEventKind::UtteranceFailed {
            utterance,
            stage,
            reason: error.to_string(),
        });
    }
}
