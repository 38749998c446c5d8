//! Capture loop: transport → segmenter → utterance queue.
//!
//! Runs until the caller hangs up or the transport fails, then fires the
//! termination trigger. The trigger is owned by the loop, so it also fires if
//! the loop unwinds.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::diagnostics::SessionDiagnostics;
use crate::buffering::{TerminationTrigger, UtteranceProducer};
use crate::error::CallError;
use crate::events::{CallEventKind, EventPublisher};
use crate::transport::AudioSource;
use crate::vad::{PushOutcome, SpeechSegmenter};

/// Why the capture loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "camelCase")]
pub enum EndReason {
    /// Hangup packet or clean EOF.
    Hangup,
    /// Read failure or peer error packet.
    TransportError(String),
}

pub(crate) struct CaptureLoop {
    pub source: Box<dyn AudioSource>,
    pub segmenter: SpeechSegmenter,
    pub producer: UtteranceProducer,
    pub trigger: TerminationTrigger,
    pub diagnostics: Arc<SessionDiagnostics>,
    pub events: EventPublisher,
}

impl CaptureLoop {
    pub fn run(mut self) -> EndReason {
        info!("capture started");

        let reason = loop {
            let chunk = match self.source.read_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break EndReason::Hangup,
                Err(e) => {
                    warn!(error = %e, "transport read failed — ending call");
                    break EndReason::TransportError(e.to_string());
                }
            };
            SessionDiagnostics::bump(&self.diagnostics.chunks_in);

            match self.segmenter.push_chunk(&chunk) {
                Ok(PushOutcome::Pending) => {}
                Ok(PushOutcome::Segment(segment)) => {
                    SessionDiagnostics::bump(&self.diagnostics.segments_emitted);
                    info!(
                        utterance = segment.seq,
                        bytes = segment.len(),
                        "utterance queued"
                    );
                    self.events.publish(CallEventKind::UtteranceQueued {
                        utterance: segment.seq,
                        bytes: segment.len(),
                        offset_ms: segment.offset.as_millis() as u64,
                    });
                    if !self.producer.push(segment) {
                        warn!("processing loop is gone — utterance dropped");
                    }
                }
                Ok(PushOutcome::Discarded { voiced_bytes }) => {
                    SessionDiagnostics::bump(&self.diagnostics.segments_discarded);
                    debug!(voiced_bytes, "no valid speech — restarting capture");
                }
                Err(CallError::InvalidChunk { len }) => {
                    SessionDiagnostics::bump(&self.diagnostics.invalid_chunks);
                    warn!(len, "malformed audio chunk rejected");
                }
                Err(e) if e.is_disconnect() => break EndReason::Hangup,
                Err(e) => break EndReason::TransportError(e.to_string()),
            }
        };

        let discarded = self.segmenter.disconnect();
        if discarded > 0 {
            debug!(discarded, "in-progress utterance dropped at end of call");
        }
        self.trigger.trigger();
        info!(?reason, "capture stopped");
        reason
    }
}
