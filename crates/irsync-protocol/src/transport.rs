//! Line-delimited JSON transport
//!
//! One frame per line over any `AsyncRead + AsyncWrite` stream. The first
//! frame from a client must be `connect`; afterwards client frames go to the
//! [`HotReloadHub`] and hub frames go to the client, until either side hangs
//! up or the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProtocolError;
use crate::hub::HotReloadHub;
use crate::message::ProtocolMessage;
use crate::validation::{decode, encode};

async fn write_frame<W>(writer: &mut W, message: &ProtocolMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = encode(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Serves one client connection until it closes or `shutdown` fires
///
/// Invalid frames are answered with an `error` frame carrying the matching
/// code; the connection stays open unless the handshake itself fails.
///
/// # Errors
/// Returns [`ProtocolError::Io`] on transport failures and the handshake
/// error if the first frame is not a valid `connect`.
pub async fn serve_connection<S>(
    hub: Arc<HotReloadHub>,
    stream: S,
    shutdown: CancellationToken,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let first = tokio::select! {
        line = lines.next_line() => line?,
        _ = shutdown.cancelled() => return Ok(()),
    };
    let Some(first) = first else {
        return Ok(());
    };

    let handshake = decode(&first).and_then(|msg| hub.connect(&msg));
    let (session_id, mut outbound) = match handshake {
        Ok(session) => session,
        Err(e) => {
            let e = match e {
                ProtocolError::UnexpectedMessage(reason) => ProtocolError::NotConnected(reason),
                other => other,
            };
            warn!(error = %e, "hot-reload handshake rejected");
            write_frame(&mut writer, &e.to_message()).await?;
            return Err(e);
        }
    };
    write_frame(&mut writer, &ProtocolMessage::connected(session_id.clone())).await?;

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = decode(&line).and_then(|msg| hub.handle(&session_id, &msg));
                let frame = match reply {
                    Ok(Some(reply)) => reply,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(%session_id, error = %e, "rejecting client frame");
                        e.to_message()
                    }
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    break Err(e);
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break Ok(());
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    break Err(e);
                }
            }
            _ = shutdown.cancelled() => break Ok(()),
        }
    };

    hub.disconnect(&session_id);
    result
}

/// TCP listener serving hot-reload clients
pub struct HotReloadServer {
    hub: Arc<HotReloadHub>,
    listener: TcpListener,
    sweep_interval: Duration,
}

impl HotReloadServer {
    /// Binds to `addr`
    ///
    /// # Errors
    /// Returns [`ProtocolError::Io`] if the address cannot be bound.
    pub async fn bind(addr: &str, hub: Arc<HotReloadHub>) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            hub,
            listener,
            sweep_interval: Duration::from_secs(10),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &Arc<HotReloadHub> {
        &self.hub
    }

    /// Accepts clients until `shutdown` fires, sweeping idle sessions
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ProtocolError> {
        info!("hot-reload server listening");
        let mut sweep = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    debug!(%peer, "hot-reload connection accepted");
                    let hub = Arc::clone(&self.hub);
                    let token = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(hub, stream, token).await {
                            debug!(%peer, error = %e, "hot-reload connection ended with error");
                        }
                    });
                }
                _ = sweep.tick() => {
                    let swept = self.hub.sweep_idle();
                    if swept > 0 {
                        debug!(swept, "idle sessions removed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("hot-reload server stopping");
                    return Ok(());
                }
            }
        }
    }
}
