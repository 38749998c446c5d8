//! Call audio transport abstraction.
//!
//! A [`CallConnection`] is split once, at session start, into three owned
//! parts so the two session loops never contend for the same handle:
//!
//! ```text
//! CallConnection::split()
//!     ├─► AudioSource      → capture loop (reads only)
//!     ├─► AudioSink        → processing loop (writes only)
//!     └─► ConnectionCloser → session (consumed exactly once)
//! ```
//!
//! [`audiosocket`] implements the Asterisk AudioSocket framing over TCP;
//! [`memory`] provides a scripted connection for tests and replay.

pub mod audiosocket;
pub mod memory;

use std::fmt;

use uuid::Uuid;

use crate::error::{CallError, Result};

/// AudioSocket packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Hangup = 0x00,
    Uuid = 0x01,
    Dtmf = 0x03,
    Audio = 0x10,
    Error = 0xff,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Hangup),
            0x01 => Some(Self::Uuid),
            0x03 => Some(Self::Dtmf),
            0x10 => Some(Self::Audio),
            0xff => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Random per-call identifier, sent to the peer in the handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Inbound half: yields one audio chunk per call.
pub trait AudioSource: Send {
    /// Block until the next audio chunk arrives.
    ///
    /// `Ok(None)` means the caller hung up.
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Outbound half.
pub trait AudioSink: Send {
    fn write_packet(&mut self, kind: PacketKind, payload: &[u8]) -> Result<()>;

    /// Write one frame of linear-16 playback audio.
    fn write_audio(&mut self, pcm: &[u8]) -> Result<()> {
        self.write_packet(PacketKind::Audio, pcm)
    }

    /// Announce the call identifier to the peer. Sent once, before audio.
    fn send_call_id(&mut self, id: &CallId) -> Result<()> {
        self.write_packet(PacketKind::Uuid, id.as_bytes())
    }
}

/// Tears down the underlying connection. Consuming `self` makes a second
/// close unrepresentable.
pub trait ConnectionCloser: Send {
    fn close(self: Box<Self>) -> Result<()>;
}

/// The three owned parts of a split connection.
pub struct ConnectionHalves {
    pub source: Box<dyn AudioSource>,
    pub sink: Box<dyn AudioSink>,
    pub closer: Box<dyn ConnectionCloser>,
}

/// An accepted call, not yet split.
pub trait CallConnection: Send {
    /// Human-readable peer description for logs.
    fn peer(&self) -> String;

    fn split(self: Box<Self>) -> Result<ConnectionHalves>;
}

/// Encode one packet: `kind: u8`, `length: u16 BE`, `payload`.
pub fn encode_packet(kind: PacketKind, payload: &[u8]) -> Result<Vec<u8>> {
    use byteorder::{BigEndian, WriteBytesExt};

    let len = u16::try_from(payload.len()).map_err(|_| {
        CallError::Transport(format!(
            "payload of {} bytes exceeds the 65535-byte packet limit",
            payload.len()
        ))
    })?;

    let mut out = Vec::with_capacity(3 + payload.len());
    out.write_u8(kind.as_byte())?;
    out.write_u16::<BigEndian>(len)?;
    out.extend_from_slice(payload);
    Ok(out)
}
