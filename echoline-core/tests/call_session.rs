use std::collections::VecDeque;
use std::io::{Cursor, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use echoline_core::services::stub::{StubTranscriber, ToneSynthesizer};
use echoline_core::services::SynthesizedAudio;
use echoline_core::transport::audiosocket::{read_packet, AudioSocketListener};
use echoline_core::transport::memory::MemoryConnection;
use echoline_core::transport::{encode_packet, PacketKind};
use echoline_core::{
    AudioFormat, CallError, CallEvent, CallEventKind, CallServices, CallSession, EndReason,
    FailureStage, SessionConfig, SessionStatus, Synthesizer, Transcriber,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

const FRAME: usize = 320;

fn chunk(level: i16) -> Vec<u8> {
    std::iter::repeat(level.to_le_bytes())
        .take(FRAME / 2)
        .flatten()
        .collect()
}

/// `loud` chunks of speech followed by `quiet` chunks of silence.
fn utterance(loud: usize, quiet: usize) -> Vec<Vec<u8>> {
    let mut chunks = vec![chunk(1_000); loud];
    chunks.extend(vec![chunk(0); quiet]);
    chunks
}

/// Replies from a script and records the size of every utterance it hears.
struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Result<String, String>>>,
    heard: Mutex<Vec<usize>>,
}

impl ScriptedTranscriber {
    fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            heard: Mutex::new(Vec::new()),
        })
    }

    fn heard(&self) -> Vec<usize> {
        self.heard.lock().clone()
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, pcm: &[u8]) -> echoline_core::Result<String> {
        self.heard.lock().push(pcm.len());
        match self.replies.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(CallError::TranscriptionFailure(reason)),
            None => Ok("again".into()),
        }
    }
}

/// Returns `bytes` of silence-level PCM for every request.
struct FixedSynthesizer {
    bytes: usize,
    spoken: Mutex<Vec<String>>,
}

impl FixedSynthesizer {
    fn new(bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            bytes,
            spoken: Mutex::new(Vec::new()),
        })
    }
}

impl Synthesizer for FixedSynthesizer {
    fn synthesize(&self, text: &str) -> echoline_core::Result<SynthesizedAudio> {
        self.spoken.lock().push(text.to_string());
        Ok(Box::new(Cursor::new(vec![7u8; self.bytes])))
    }
}

fn services(t: &Arc<ScriptedTranscriber>, s: &Arc<FixedSynthesizer>) -> CallServices {
    CallServices {
        transcriber: t.clone(),
        synthesizer: s.clone(),
    }
}

fn drain(rx: &mut broadcast::Receiver<CallEvent>) -> Vec<CallEventKind> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event.kind);
    }
    out
}

#[test]
fn one_utterance_round_trip() {
    let conn = MemoryConnection::new(utterance(30, 80))
        .linger(Duration::from_secs(5))
        .hang_up_after_frames(4);
    let log = conn.log();
    let transcriber = ScriptedTranscriber::new(vec![Ok("  hello there ")]);
    let synthesizer = FixedSynthesizer::new(3 * FRAME + FRAME / 2);

    let session = CallSession::new(
        Box::new(conn),
        SessionConfig::default(),
        services(&transcriber, &synthesizer),
    );
    let mut rx = session.subscribe();
    let summary = session.run().expect("session runs");

    assert_eq!(transcriber.heard(), vec![9_600]);
    assert_eq!(*synthesizer.spoken.lock(), vec!["hello there".to_string()]);

    let sent = log.sent();
    assert_eq!(sent[0].kind, PacketKind::Uuid);
    assert_eq!(sent[0].payload.len(), 16);

    let frames = log.audio_frames();
    assert_eq!(
        frames.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![FRAME, FRAME, FRAME, FRAME / 2]
    );

    // Frames are released at line rate, not in a burst.
    let audio: Vec<_> = sent.iter().filter(|p| p.kind == PacketKind::Audio).collect();
    let span = audio[3].at.duration_since(audio[0].at);
    assert!(span >= Duration::from_millis(55), "frames sent too fast: {span:?}");

    assert_eq!(log.close_count(), 1);
    assert_eq!(summary.end, EndReason::Hangup);
    assert_eq!(summary.diagnostics.segments_emitted, 1);
    assert_eq!(summary.diagnostics.frames_written, 4);

    let events = drain(&mut rx);
    let statuses: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            CallEventKind::Status { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Accepted,
            SessionStatus::Active,
            SessionStatus::Ended
        ]
    );
    assert!(events.contains(&CallEventKind::Transcript {
        utterance: 0,
        text: "hello there".into(),
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, CallEventKind::PlaybackFinished { utterance: 0, frames: 4, .. })));
}

#[test]
fn hangup_mid_utterance_transcribes_nothing() {
    let conn = MemoryConnection::new(utterance(30, 10));
    let log = conn.log();
    let transcriber = ScriptedTranscriber::new(vec![]);
    let synthesizer = FixedSynthesizer::new(FRAME);

    let summary = CallSession::new(
        Box::new(conn),
        SessionConfig::default(),
        services(&transcriber, &synthesizer),
    )
    .run()
    .expect("session runs");

    assert!(transcriber.heard().is_empty());
    assert_eq!(log.audio_frame_count(), 0);
    assert_eq!(log.close_count(), 1);
    assert_eq!(summary.diagnostics.segments_emitted, 0);
}

#[test]
fn short_blip_is_discarded() {
    let conn = MemoryConnection::new(utterance(10, 100));
    let transcriber = ScriptedTranscriber::new(vec![]);
    let synthesizer = FixedSynthesizer::new(FRAME);

    let summary = CallSession::new(
        Box::new(conn),
        SessionConfig::default(),
        services(&transcriber, &synthesizer),
    )
    .run()
    .expect("session runs");

    assert!(transcriber.heard().is_empty());
    assert_eq!(summary.diagnostics.segments_discarded, 1);
}

#[test]
fn transcription_failure_skips_to_next_utterance() {
    let mut chunks = utterance(30, 80);
    chunks.extend(utterance(40, 80));
    let conn = MemoryConnection::new(chunks)
        .linger(Duration::from_secs(5))
        .hang_up_after_frames(2);
    let log = conn.log();
    let transcriber = ScriptedTranscriber::new(vec![Err("status 503"), Ok("second")]);
    let synthesizer = FixedSynthesizer::new(2 * FRAME);

    let session = CallSession::new(
        Box::new(conn),
        SessionConfig::default(),
        services(&transcriber, &synthesizer),
    );
    let mut rx = session.subscribe();
    let summary = session.run().expect("session runs");

    assert_eq!(transcriber.heard(), vec![9_600, 12_800]);
    assert_eq!(*synthesizer.spoken.lock(), vec!["second".to_string()]);
    assert_eq!(log.audio_frame_count(), 2);
    assert_eq!(summary.diagnostics.transcription_failures, 1);
    assert_eq!(summary.diagnostics.transcriptions, 1);
    assert_eq!(summary.diagnostics.syntheses, 1);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        CallEventKind::UtteranceFailed {
            utterance: 0,
            stage: FailureStage::Transcription,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, CallEventKind::PlaybackFinished { utterance: 1, .. })));
}

#[test]
fn write_failure_aborts_only_current_playback() {
    let conn = MemoryConnection::new(utterance(30, 80))
        .linger(Duration::from_secs(5))
        .hang_up_after_frames(2)
        .fail_audio_writes_after(2);
    let log = conn.log();
    let transcriber = ScriptedTranscriber::new(vec![Ok("hi")]);
    let synthesizer = FixedSynthesizer::new(5 * FRAME);

    let session = CallSession::new(
        Box::new(conn),
        SessionConfig::default(),
        services(&transcriber, &synthesizer),
    );
    let mut rx = session.subscribe();
    let summary = session.run().expect("session runs");

    assert_eq!(log.audio_frame_count(), 2);
    assert_eq!(log.close_count(), 1);
    assert_eq!(summary.end, EndReason::Hangup);
    assert_eq!(summary.diagnostics.frames_written, 2);
    assert_eq!(summary.diagnostics.playback_aborts, 1);
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        CallEventKind::UtteranceFailed {
            stage: FailureStage::Playback,
            ..
        }
    )));
}

#[test]
fn audiosocket_call_over_loopback() {
    let listener = AudioSocketListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = thread::spawn(move || {
        let conn = listener.accept().expect("accept");
        let format = AudioFormat::default();
        let services =
            CallServices::new(StubTranscriber::new(format), ToneSynthesizer::new(format));
        CallSession::new(Box::new(conn), SessionConfig::default(), services).run()
    });

    let mut client = TcpStream::connect(addr).expect("connect");
    let (kind, payload) = read_packet(&mut client)
        .expect("read handshake")
        .expect("handshake packet");
    assert_eq!(kind, PacketKind::Uuid.as_byte());
    assert_eq!(payload.len(), 16);

    for c in utterance(30, 80) {
        client
            .write_all(&encode_packet(PacketKind::Audio, &c).expect("encode"))
            .expect("send audio");
    }

    // "[stub: 600 ms of speech]" is 24 characters: 960 ms of tone.
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .expect("read timeout");
    let mut received = Vec::new();
    loop {
        match read_packet(&mut client) {
            Ok(Some((kind, payload))) if kind == PacketKind::Audio.as_byte() => {
                received.push(payload)
            }
            Ok(Some(_)) => {}
            Ok(None) => panic!("server closed before hangup"),
            Err(CallError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
                    && !received.is_empty() =>
            {
                break
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    assert_eq!(received.len(), 48);
    assert!(received.iter().all(|f| f.len() == FRAME));

    client
        .write_all(&encode_packet(PacketKind::Hangup, &[]).expect("encode"))
        .expect("send hangup");
    client.set_read_timeout(None).expect("clear timeout");
    assert!(read_packet(&mut client).expect("read after hangup").is_none());

    let summary = server.join().expect("server thread").expect("session runs");
    assert_eq!(summary.end, EndReason::Hangup);
    assert_eq!(summary.diagnostics.segments_emitted, 1);
    assert_eq!(summary.diagnostics.frames_written, 48);
}

#[test]
fn peer_error_packet_ends_call_with_transport_error() {
    let listener = AudioSocketListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let (tx, _) = broadcast::channel(64);
    let mut rx = tx.subscribe();
    let server = thread::spawn(move || {
        let conn = listener.accept().expect("accept");
        let format = AudioFormat::default();
        let services =
            CallServices::new(StubTranscriber::new(format), ToneSynthesizer::new(format));
        CallSession::with_event_channel(Box::new(conn), SessionConfig::default(), services, tx)
            .run()
    });

    let mut client = TcpStream::connect(addr).expect("connect");
    read_packet(&mut client)
        .expect("read handshake")
        .expect("handshake packet");
    for (kind, payload) in [
        (PacketKind::Dtmf, b"5".to_vec()),
        (PacketKind::Uuid, vec![0x22; 16]),
        (PacketKind::Audio, chunk(0)),
        (PacketKind::Error, vec![0x02]),
    ] {
        client
            .write_all(&encode_packet(kind, &payload).expect("encode"))
            .expect("send packet");
    }
    assert!(read_packet(&mut client).expect("read until close").is_none());

    let summary = server.join().expect("server thread").expect("session runs");
    match &summary.end {
        EndReason::TransportError(reason) => assert!(reason.contains("0x02"), "{reason}"),
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(summary.diagnostics.chunks_in, 1);

    let ended_detail = drain(&mut rx).into_iter().find_map(|kind| match kind {
        CallEventKind::Status {
            status: SessionStatus::Ended,
            detail,
        } => Some(detail),
        _ => None,
    });
    assert!(matches!(ended_detail, Some(Some(ref d)) if d.contains("0x02")));
}
