//! Call lifecycle events, published on a `tokio::sync::broadcast` channel.
//!
//! Every event carries the call id and a per-call sequence number so a
//! subscriber watching many calls can reassemble each call's timeline.
//! Sending never blocks; with no subscribers events are simply dropped.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Broadcast capacity: events buffered for a slow subscriber.
pub const EVENT_CHANNEL_CAP: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub call_id: String,
    /// Monotonically increasing within one call.
    pub seq: u64,
    pub kind: CallEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CallEventKind {
    #[serde(rename_all = "camelCase")]
    Status {
        status: SessionStatus,
        detail: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UtteranceQueued {
        utterance: u64,
        bytes: usize,
        offset_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Transcript { utterance: u64, text: String },
    #[serde(rename_all = "camelCase")]
    PlaybackFinished {
        utterance: u64,
        frames: usize,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    UtteranceFailed {
        utterance: u64,
        stage: FailureStage,
        reason: String,
    },
}

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Connection accepted, handshake not yet sent.
    Accepted,
    /// Capture and processing loops running.
    Active,
    /// Both loops stopped and the connection closed.
    Ended,
}

/// Where an utterance's round trip broke down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Transcription,
    Synthesis,
    Playback,
}

/// Stamps and sends events for one call. Cloned into both session loops.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    call_id: String,
    tx: broadcast::Sender<CallEvent>,
    seq: Arc<AtomicU64>,
}

impl EventPublisher {
    pub fn new(call_id: impl Into<String>, tx: broadcast::Sender<CallEvent>) -> Self {
        Self {
            call_id: call_id.into(),
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, kind: CallEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(CallEvent {
            call_id: self.call_id.clone(),
            seq,
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }
}
