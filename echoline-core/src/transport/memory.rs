//! Scripted in-memory call connection.
//!
//! Plays a fixed list of inbound chunks (optionally paced like a live line),
//! records every outbound packet with its write time, then hangs up. Used by
//! the session tests and for replaying captured call audio offline.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    AudioSink, AudioSource, CallConnection, ConnectionCloser, ConnectionHalves, PacketKind,
};
use crate::error::{CallError, Result};

/// One recorded outbound packet.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub kind: PacketKind,
    pub payload: Vec<u8>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct LogInner {
    sent: Vec<SentPacket>,
    closes: usize,
}

/// Shared view of everything a [`MemoryConnection`] sent. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MemoryLog {
    pub fn sent(&self) -> Vec<SentPacket> {
        self.inner.lock().sent.clone()
    }

    /// Payloads of the `Audio` packets, in write order.
    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|p| p.kind == PacketKind::Audio)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn audio_frame_count(&self) -> usize {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|p| p.kind == PacketKind::Audio)
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.inner.lock().closes
    }
}

/// In-memory [`CallConnection`].
pub struct MemoryConnection {
    chunks: VecDeque<Vec<u8>>,
    pace: Option<Duration>,
    linger: Duration,
    hang_up_after_frames: Option<usize>,
    fail_audio_writes_after: Option<usize>,
    log: MemoryLog,
}

impl MemoryConnection {
    /// A caller that sends `chunks` back-to-back and then hangs up.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            pace: None,
            linger: Duration::ZERO,
            hang_up_after_frames: None,
            fail_audio_writes_after: None,
            log: MemoryLog::default(),
        }
    }

    /// Deliver one chunk every `interval`, like a live line.
    pub fn paced(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Stay on the line for up to `linger` after the last chunk.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// While lingering, hang up as soon as `frames` audio packets were sent.
    pub fn hang_up_after_frames(mut self, frames: usize) -> Self {
        self.hang_up_after_frames = Some(frames);
        self
    }

    /// Fail every audio write after the first `frames` succeed.
    pub fn fail_audio_writes_after(mut self, frames: usize) -> Self {
        self.fail_audio_writes_after = Some(frames);
        self
    }

    pub fn log(&self) -> MemoryLog {
        self.log.clone()
    }
}

impl CallConnection for MemoryConnection {
    fn peer(&self) -> String {
        "memory".into()
    }

    fn split(self: Box<Self>) -> Result<ConnectionHalves> {
        let this = *self;
        Ok(ConnectionHalves {
            source: Box::new(MemorySource {
                chunks: this.chunks,
                pace: this.pace,
                linger: Some(this.linger),
                hang_up_after_frames: this.hang_up_after_frames,
                log: this.log.clone(),
            }),
            sink: Box::new(MemorySink {
                fail_audio_writes_after: this.fail_audio_writes_after,
                audio_writes: 0,
                log: this.log.clone(),
            }),
            closer: Box::new(MemoryCloser { log: this.log }),
        })
    }
}

struct MemorySource {
    chunks: VecDeque<Vec<u8>>,
    pace: Option<Duration>,
    /// `None` once the linger period has been spent.
    linger: Option<Duration>,
    hang_up_after_frames: Option<usize>,
    log: MemoryLog,
}

impl AudioSource for MemorySource {
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(chunk) = self.chunks.pop_front() {
            if let Some(interval) = self.pace {
                thread::sleep(interval);
            }
            return Ok(Some(chunk));
        }

        if let Some(linger) = self.linger.take() {
            let start = Instant::now();
            while start.elapsed() < linger {
                if let Some(frames) = self.hang_up_after_frames {
                    if self.log.audio_frame_count() >= frames {
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(None)
    }
}

struct MemorySink {
    fail_audio_writes_after: Option<usize>,
    audio_writes: usize,
    log: MemoryLog,
}

impl AudioSink for MemorySink {
    fn write_packet(&mut self, kind: PacketKind, payload: &[u8]) -> Result<()> {
        if kind == PacketKind::Audio {
            if let Some(limit) = self.fail_audio_writes_after {
                if self.audio_writes >= limit {
                    return Err(CallError::Io(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "scripted write failure",
                    )));
                }
            }
            self.audio_writes += 1;
        }
        self.log.inner.lock().sent.push(SentPacket {
            kind,
            payload: payload.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }
}

struct MemoryCloser {
    log: MemoryLog,
}

impl ConnectionCloser for MemoryCloser {
    fn close(self: Box<Self>) -> Result<()> {
        self.log.inner.lock().closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_replays_chunks_then_hangs_up() {
        let conn = Box::new(MemoryConnection::new(vec![vec![1, 0], vec![2, 0]]));
        let mut halves = conn.split().unwrap();

        assert_eq!(halves.source.read_chunk().unwrap(), Some(vec![1, 0]));
        assert_eq!(halves.source.read_chunk().unwrap(), Some(vec![2, 0]));
        assert_eq!(halves.source.read_chunk().unwrap(), None);
        assert_eq!(halves.source.read_chunk().unwrap(), None);
    }

    #[test]
    fn sink_records_packets_and_scripted_failures() {
        let conn = MemoryConnection::new(vec![]).fail_audio_writes_after(1);
        let log = conn.log();
        let mut halves = Box::new(conn).split().unwrap();

        halves.sink.write_packet(PacketKind::Uuid, &[0; 16]).unwrap();
        halves.sink.write_audio(&[1, 2]).unwrap();
        assert!(halves.sink.write_audio(&[3, 4]).is_err());
        halves.closer.close().unwrap();

        assert_eq!(log.sent().len(), 2);
        assert_eq!(log.audio_frames(), vec![vec![1, 2]]);
        assert_eq!(log.close_count(), 1);
    }
}
