//! # echoline-core
//!
//! Call audio engine: turns each spoken utterance on a phone call into a
//! synthesized spoken reply.
//!
//! ## Architecture
//!
//! ```text
//! CallConnection::split()
//!   AudioSource ─► capture thread ─► SpeechSegmenter ─► utterance queue
//!                                                            │
//!                              processing thread ◄───────────┘
//!                                     │
//!                        Transcriber::transcribe
//!                                     │
//!                        Synthesizer::synthesize
//!                                     │
//!   AudioSink ◄──── PlaybackPacer (one frame per frame duration)
//!
//!   both threads ─► broadcast::Sender<CallEvent>
//! ```
//!
//! Capture never waits on the services: a slow transcription only grows the
//! utterance queue. A hangup fires the termination signal, which wakes the
//! processing thread once its current utterance is done.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod error;
pub mod events;
pub mod playback;
pub mod services;
pub mod session;
pub mod transport;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::AudioFormat;
pub use error::{CallError, Result};
pub use events::{CallEvent, CallEventKind, FailureStage, SessionStatus};
pub use services::{CallServices, Synthesizer, Transcriber};
pub use session::{CallSession, EndReason, SessionConfig, SessionSummary};
pub use transport::{CallConnection, CallId};
pub use vad::VadConfig;

#[cfg(feature = "deepgram")]
pub use services::{DeepgramConfig, DeepgramService};
