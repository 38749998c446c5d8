//! Per-call utterance hand-off.
//!
//! A single-producer / single-consumer FIFO built on `crossbeam-channel`:
//! the capture loop pushes finalized [`SpeechSegment`]s without blocking, the
//! processing loop pops them in order and blocks while the queue is empty.
//!
//! Termination is a separate zero-message channel. Dropping (or calling
//! [`TerminationTrigger::trigger`] on) the trigger disconnects it, which wakes
//! every pending `pop` with `None`. Because the trigger fires on drop, a
//! capture thread that unwinds still releases the processing loop.

pub mod segment;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use tracing::debug;

pub use segment::SpeechSegment;

/// Held by the capture side; fires when dropped.
#[derive(Debug)]
pub struct TerminationTrigger {
    _tx: Sender<()>,
}

impl TerminationTrigger {
    /// Signal end-of-call to every holder of the matching signal.
    pub fn trigger(self) {
        drop(self);
    }
}

/// Observer half of the termination channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TerminationSignal {
    rx: Receiver<()>,
}

impl TerminationSignal {
    pub fn is_terminated(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Create a matched trigger/signal pair.
pub fn termination_signal() -> (TerminationTrigger, TerminationSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (TerminationTrigger { _tx: tx }, TerminationSignal { rx })
}

/// Producer half — owned by the capture loop.
#[derive(Debug)]
pub struct UtteranceProducer {
    tx: Sender<SpeechSegment>,
}

impl UtteranceProducer {
    /// Enqueue a segment. Never blocks.
    ///
    /// Returns `false` if the consumer is gone and the segment was dropped.
    pub fn push(&self, segment: SpeechSegment) -> bool {
        self.tx.send(segment).is_ok()
    }
}

/// Consumer half — owned by the processing loop.
#[derive(Debug)]
pub struct UtteranceConsumer {
    rx: Receiver<SpeechSegment>,
    termination: TerminationSignal,
}

impl UtteranceConsumer {
    /// Block until the next segment is available.
    ///
    /// Returns `None` once the call has terminated (or the producer is gone).
    /// Termination wins over queued segments: nobody is left to hear them.
    /// This holds even when a segment and termination become ready together,
    /// since a segment received after termination is discarded.
    pub fn pop(&self) -> Option<SpeechSegment> {
        if self.termination.is_terminated() {
            return None;
        }
        let segment = select! {
            recv(self.rx) -> segment => segment.ok(),
            recv(self.termination.rx) -> _ => None,
        };
        self.admit(segment)
    }

    fn admit(&self, segment: Option<SpeechSegment>) -> Option<SpeechSegment> {
        match segment {
            Some(segment) if self.termination.is_terminated() => {
                debug!(utterance = segment.seq, "call ended while popping — dropping");
                None
            }
            other => other,
        }
    }

    /// Segments waiting to be popped.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Create an unbounded utterance queue whose consumer stops on `termination`.
pub fn utterance_queue(termination: TerminationSignal) -> (UtteranceProducer, UtteranceConsumer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (UtteranceProducer { tx }, UtteranceConsumer { rx, termination })
}
