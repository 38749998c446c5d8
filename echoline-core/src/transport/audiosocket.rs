//! Asterisk AudioSocket transport over TCP.
//!
//! Every packet is a 3-byte header (`kind: u8`, `length: u16 BE`) followed by
//! `length` payload bytes. Audio payloads are signed-linear 16-bit PCM.
//!
//! The reader half yields audio payloads and folds the control packets into
//! the [`AudioSource`] contract: hangup and clean EOF end the call, an error
//! packet becomes `CallError::Transport`, UUID / DTMF / unknown packets are
//! logged and skipped.

use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, info, warn};

use super::{
    encode_packet, AudioSink, AudioSource, CallConnection, CallId, ConnectionCloser,
    ConnectionHalves, PacketKind,
};
use crate::error::{CallError, Result};

/// Listening socket that yields one [`AudioSocketConnection`] per call.
#[derive(Debug)]
pub struct AudioSocketListener {
    inner: TcpListener,
}

impl AudioSocketListener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let inner = TcpListener::bind(addr)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Block until the next call connects.
    pub fn accept(&self) -> Result<AudioSocketConnection> {
        let (stream, _) = self.inner.accept()?;
        AudioSocketConnection::from_stream(stream)
    }
}

/// One accepted TCP call.
#[derive(Debug)]
pub struct AudioSocketConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl AudioSocketConnection {
    /// Adopt a stream accepted elsewhere (e.g. by an async listener). The
    /// stream must be in blocking mode.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        // Playback frames are small and latency-sensitive.
        stream.set_nodelay(true)?;
        info!(%peer, "call connected");
        Ok(Self { stream, peer })
    }

    /// Open an outbound connection (used by loopback tests and tools).
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }
}

impl CallConnection for AudioSocketConnection {
    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn split(self: Box<Self>) -> Result<ConnectionHalves> {
        let reader = self.stream.try_clone()?;
        let writer = self.stream.try_clone()?;
        Ok(ConnectionHalves {
            source: Box::new(AudioSocketReader::new(BufReader::new(reader))),
            sink: Box::new(AudioSocketWriter { stream: writer }),
            closer: Box::new(AudioSocketCloser {
                stream: self.stream,
            }),
        })
    }
}

/// Read one raw packet. `Ok(None)` on a clean EOF at a packet boundary.
pub fn read_packet<R: Read>(reader: &mut R) -> Result<Option<(u8, Vec<u8>)>> {
    let kind = match reader.read_u8() {
        Ok(kind) => kind,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(truncated)?;
    Ok(Some((kind, payload)))
}

fn truncated(e: io::Error) -> CallError {
    if e.kind() == ErrorKind::UnexpectedEof {
        CallError::Transport("connection closed mid-packet".into())
    } else {
        e.into()
    }
}

struct AudioSocketReader<R> {
    reader: R,
    finished: bool,
}

impl<R> AudioSocketReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }
}

impl<R: Read + Send> AudioSource for AudioSocketReader<R> {
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let Some((tag, payload)) = read_packet(&mut self.reader)? else {
                self.finished = true;
                return Ok(None);
            };
            match PacketKind::from_byte(tag) {
                Some(PacketKind::Audio) => return Ok(Some(payload)),
                Some(PacketKind::Hangup) => {
                    debug!("hangup packet received");
                    self.finished = true;
                    return Ok(None);
                }
                Some(PacketKind::Error) => {
                    let code = payload.first().copied().unwrap_or(0);
                    return Err(CallError::Transport(format!(
                        "peer reported error code {code:#04x}"
                    )));
                }
                Some(PacketKind::Uuid) => match <[u8; 16]>::try_from(payload.as_slice()) {
                    Ok(bytes) => debug!(peer_call_id = %CallId::from_bytes(bytes), "peer uuid"),
                    Err(_) => warn!(len = payload.len(), "malformed uuid packet ignored"),
                },
                Some(PacketKind::Dtmf) => {
                    let digit = payload.first().map(|&b| b as char);
                    debug!(?digit, "dtmf digit ignored");
                }
                None => debug!(tag = format_args!("{tag:#04x}"), "unknown packet ignored"),
            }
        }
    }
}

struct AudioSocketWriter {
    stream: TcpStream,
}

impl AudioSink for AudioSocketWriter {
    fn write_packet(&mut self, kind: PacketKind, payload: &[u8]) -> Result<()> {
        // Header and payload go out in one write so a frame is never split
        // across a partial header.
        let packet = encode_packet(kind, payload)?;
        self.stream.write_all(&packet)?;
        Ok(())
    }
}

struct AudioSocketCloser {
    stream: TcpStream,
}

impl ConnectionCloser for AudioSocketCloser {
    fn close(self: Box<Self>) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already tore the socket down.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
