//! Accept loop: one blocking [`CallSession`] per inbound AudioSocket call.
//!
//! Accepting is async (tokio) so shutdown can interrupt it; each session then
//! runs on the blocking pool because both of its loops do blocking I/O. A
//! semaphore caps the number of calls in progress; further connections wait
//! in the listen backlog.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use echoline_core::events::EVENT_CHANNEL_CAP;
use echoline_core::transport::audiosocket::AudioSocketConnection;
use echoline_core::{CallEvent, CallEventKind, CallServices, CallSession, SessionConfig};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

pub struct CallServer {
    listener: TcpListener,
    config: SessionConfig,
    services: CallServices,
    slots: Arc<Semaphore>,
    events: broadcast::Sender<CallEvent>,
}

impl CallServer {
    pub async fn bind(
        addr: &str,
        config: SessionConfig,
        services: CallServices,
        max_calls: usize,
    ) -> Result<Self> {
        config.validate().context("invalid session configuration")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAP);
        Ok(Self {
            listener,
            config,
            services,
            slots: Arc::new(Semaphore::new(max_calls)),
            events,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Serve calls until `shutdown` resolves. Calls already in progress are
    /// left to finish on their own.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        info!(addr = %self.local_addr()?, "listening for AudioSocket calls");

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&self.slots).acquire_owned() => {
                    permit.context("call slot semaphore closed")?
                }
            };

            let stream = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let connection = match stream
                .into_std()
                .and_then(|s| s.set_nonblocking(false).map(|_| s))
            {
                Ok(std_stream) => match AudioSocketConnection::from_stream(std_stream) {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!(error = %e, "could not adopt connection");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "could not switch connection to blocking mode");
                    continue;
                }
            };

            let session = CallSession::with_event_channel(
                Box::new(connection),
                self.config.clone(),
                self.services.clone(),
                self.events.clone(),
            );
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                match session.run() {
                    Ok(summary) => debug!(
                        call_id = %summary.call_id,
                        duration_ms = summary.duration.as_millis() as u64,
                        "session finished"
                    ),
                    Err(e) => error!(error = %e, "session failed to start"),
                }
            });
        }

        info!("shutting down; calls in progress will finish");
        Ok(())
    }
}

/// Log call events as they arrive. Runs until the channel closes.
pub async fn log_events(mut rx: broadcast::Receiver<CallEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                CallEventKind::Transcript { utterance, text } => {
                    info!(call_id = %event.call_id, utterance, text = %text, "caller said")
                }
                CallEventKind::UtteranceFailed {
                    utterance,
                    stage,
                    reason,
                } => warn!(call_id = %event.call_id, utterance, ?stage, reason = %reason, "utterance failed"),
                kind => debug!(call_id = %event.call_id, seq = event.seq, ?kind, "call event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
