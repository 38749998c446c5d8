//! `CallSession` — lifecycle of one call.
//!
//! ## Lifecycle
//!
//! ```text
//! CallSession::new()            status = Accepted
//!     └─► run()
//!         ├─ split connection, send call-id packet
//!         ├─ spawn processing + capture threads     status = Active
//!         ├─ join both (capture ends on hangup, fires termination;
//!         │             processing finishes its utterance and exits)
//!         └─ close connection once                  status = Ended
//! ```
//!
//! ## Threading
//!
//! The capture loop only reads, the processing loop only writes. They share
//! nothing but the utterance queue, the termination signal, the event
//! publisher and the lock-free diagnostics counters. `run()` blocks the
//! calling thread for the whole call; the server runs it on the blocking
//! pool.

mod capture;
pub mod diagnostics;
mod process;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn};

pub use capture::EndReason;
pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

use crate::{
    audio::AudioFormat,
    buffering::{termination_signal, utterance_queue},
    error::{CallError, Result},
    events::{CallEvent, CallEventKind, EventPublisher, SessionStatus, EVENT_CHANNEL_CAP},
    playback::PlaybackPacer,
    services::CallServices,
    transport::{CallConnection, CallId, ConnectionHalves},
    vad::{SpeechSegmenter, VadConfig},
};
use capture::CaptureLoop;
use process::ProcessLoop;

/// Everything a session needs to know about the line and the VAD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    pub format: AudioFormat,
    pub vad: VadConfig,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        self.format.validate()?;
        self.vad.validate()?;
        if self.format.bytes_for(self.vad.min_speech) == 0 {
            return Err(CallError::Config(
                "minimum speech duration is shorter than one sample".into(),
            ));
        }
        Ok(())
    }
}

/// What a finished call looked like.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub call_id: String,
    pub end: EndReason,
    pub duration: Duration,
    pub diagnostics: DiagnosticsSnapshot,
}

pub struct CallSession {
    id: CallId,
    config: SessionConfig,
    services: CallServices,
    connection: Box<dyn CallConnection>,
    events: EventPublisher,
}

impl CallSession {
    /// Wrap an accepted connection. Nothing is sent until [`run`](Self::run).
    pub fn new(
        connection: Box<dyn CallConnection>,
        config: SessionConfig,
        services: CallServices,
    ) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Self::with_event_channel(connection, config, services, tx)
    }

    /// Like [`new`](Self::new), publishing onto a shared event channel.
    pub fn with_event_channel(
        connection: Box<dyn CallConnection>,
        config: SessionConfig,
        services: CallServices,
        tx: broadcast::Sender<CallEvent>,
    ) -> Self {
        let id = CallId::new_random();
        Self {
            id,
            config,
            services,
            connection,
            events: EventPublisher::new(id.to_string(), tx),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Run the call to completion.
    ///
    /// # Errors
    /// Only if the call could not be started (connection split or handshake
    /// failure). A hangup or a mid-call transport error ends the call
    /// normally and is reported in the summary.
    pub fn run(self) -> Result<SessionSummary> {
        let Self {
            id,
            config,
            services,
            connection,
            events,
        } = self;

        let span = info_span!("call", call_id = %id, peer = %connection.peer());
        let _enter = span.enter();
        let started = Instant::now();
        let diagnostics = Arc::new(SessionDiagnostics::default());
        announce(&events, SessionStatus::Accepted, None);

        let ConnectionHalves {
            source,
            mut sink,
            closer,
        } = match connection.split() {
            Ok(halves) => halves,
            Err(e) => {
                error!(error = %e, "failed to split connection");
                announce(&events, SessionStatus::Ended, Some(e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = sink.send_call_id(&id) {
            error!(error = %e, "handshake failed");
            if let Err(close_err) = closer.close() {
                warn!(error = %close_err, "close after failed handshake");
            }
            announce(&events, SessionStatus::Ended, Some(e.to_string()));
            return Err(e);
        }
        announce(&events, SessionStatus::Active, None);

        let (trigger, signal) = termination_signal();
        let (producer, consumer) = utterance_queue(signal);

        let process = ProcessLoop {
            consumer,
            sink,
            services,
            pacer: PlaybackPacer::new(config.format),
            diagnostics: Arc::clone(&diagnostics),
            events: events.clone(),
        };
        let capture = CaptureLoop {
            source,
            segmenter: SpeechSegmenter::new(config.format, &config.vad),
            producer,
            trigger,
            diagnostics: Arc::clone(&diagnostics),
            events: events.clone(),
        };

        let short_id: String = id.to_string().chars().take(8).collect();

        // Spawn processing before capture: a capture closure that never runs
        // still drops the trigger and releases the processing loop.
        let process_span = span.clone();
        let process_handle = thread::Builder::new()
            .name(format!("process-{short_id}"))
            .spawn(move || {
                let _enter = process_span.enter();
                process.run();
            });
        let capture_span = span.clone();
        let capture_handle = thread::Builder::new()
            .name(format!("capture-{short_id}"))
            .spawn(move || {
                let _enter = capture_span.enter();
                capture.run()
            });

        let end = match capture_handle {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                error!("capture thread panicked");
                EndReason::TransportError("capture thread panicked".into())
            }),
            Err(e) => {
                error!(error = %e, "failed to spawn capture thread");
                EndReason::TransportError(format!("capture thread spawn failed: {e}"))
            }
        };
        match process_handle {
            Ok(handle) => {
                if handle.join().is_err() {
                    error!("processing thread panicked");
                }
            }
            Err(e) => error!(error = %e, "failed to spawn processing thread"),
        }

        if let Err(e) = closer.close() {
            warn!(error = %e, "connection close failed");
        }

        let detail = match &end {
            EndReason::Hangup => None,
            EndReason::TransportError(reason) => Some(reason.clone()),
        };
        announce(&events, SessionStatus::Ended, detail);

        let snap = diagnostics.snapshot();
        info!(
            chunks_in = snap.chunks_in,
            invalid_chunks = snap.invalid_chunks,
            segments_emitted = snap.segments_emitted,
            segments_discarded = snap.segments_discarded,
            transcriptions = snap.transcriptions,
            transcription_failures = snap.transcription_failures,
            syntheses = snap.syntheses,
            synthesis_failures = snap.synthesis_failures,
            frames_written = snap.frames_written,
            playback_aborts = snap.playback_aborts,
            "call ended — diagnostics"
        );

        Ok(SessionSummary {
            call_id: id.to_string(),
            end,
            duration: started.elapsed(),
            diagnostics: snap,
        })
    }
}

fn announce(events: &EventPublisher, status: SessionStatus, detail: Option<String>) {
    info!(?status, "call status");
    events.publish(CallEventKind::Status { status, detail });
}
