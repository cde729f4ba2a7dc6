//! Session hub for hot-reload clients
//!
//! The hub owns every connected session and fans IR updates out to them.
//! Each session gets a bounded outbound channel; the transport task drains
//! it onto the wire.
//!
//! A client receives a delta when it acknowledged the version pushed just
//! before the new one, and a full snapshot otherwise.

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use irsync_core::domain::IrDocument;

use crate::delta;
use crate::error::ProtocolError;
use crate::message::{MessageBody, ProtocolMessage, SchemaUpdate, PROTOCOL_VERSION};

/// Outbound frames buffered per session before it is considered stalled
const SESSION_BUFFER: usize = 256;

struct Session {
    client_id: String,
    outbound: mpsc::Sender<ProtocolMessage>,
    /// Latest version acknowledged per IR id
    acked: HashMap<String, u64>,
    last_seen: Instant,
}

#[derive(Clone)]
struct Published {
    version: u64,
    document: IrDocument,
}

/// Result of one push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub full: usize,
    pub delta: usize,
    pub dropped: usize,
}

impl PushReport {
    pub fn delivered(&self) -> usize {
        self.full + self.delta
    }
}

/// Tracks sessions and publishes IR updates to them
pub struct HotReloadHub {
    sessions: DashMap<String, Session>,
    published: DashMap<String, Published>,
    session_timeout: Duration,
}

impl HotReloadHub {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            published: DashMap::new(),
            session_timeout,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Opens a session for a `connect` frame
    ///
    /// Returns the session id and the receiver of frames for that client.
    ///
    /// # Errors
    /// Returns [`ProtocolError::VersionMismatch`] if the client speaks another
    /// version, or [`ProtocolError::UnexpectedMessage`] for any other frame.
    pub fn connect(
        &self,
        message: &ProtocolMessage,
    ) -> Result<(String, mpsc::Receiver<ProtocolMessage>), ProtocolError> {
        if message.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: message.version,
            });
        }
        let MessageBody::Connect { client_id } = &message.body else {
            return Err(ProtocolError::UnexpectedMessage(format!(
                "expected connect, got {}",
                message.message_type()
            )));
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let (outbound, rx) = mpsc::channel(SESSION_BUFFER);
        self.sessions.insert(
            session_id.clone(),
            Session {
                client_id: client_id.clone(),
                outbound,
                acked: HashMap::new(),
                last_seen: Instant::now(),
            },
        );
        info!(%session_id, %client_id, "hot-reload client connected");
        Ok((session_id, rx))
    }

    pub fn disconnect(&self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id);
        if let Some((_, session)) = &removed {
            info!(%session_id, client_id = %session.client_id, "hot-reload client disconnected");
        }
        removed.is_some()
    }

    /// Handles a frame from an open session and returns the reply, if any
    ///
    /// # Errors
    /// Returns [`ProtocolError::NotConnected`] for unknown sessions and
    /// [`ProtocolError::UnexpectedMessage`] for server-only frames.
    pub fn handle(
        &self,
        session_id: &str,
        message: &ProtocolMessage,
    ) -> Result<Option<ProtocolMessage>, ProtocolError> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| ProtocolError::NotConnected(session_id.to_string()))?;
        session.last_seen = Instant::now();

        match &message.body {
            MessageBody::Ping { nonce } => Ok(Some(ProtocolMessage::pong(*nonce))),
            MessageBody::Pong { .. } => Ok(None),
            MessageBody::Ack { ir_id, version } => {
                let entry = session.acked.entry(ir_id.clone()).or_insert(0);
                *entry = (*entry).max(*version);
                debug!(%session_id, %ir_id, version, "update acknowledged");
                Ok(None)
            }
            MessageBody::Error { code, message } => {
                warn!(%session_id, %code, %message, "client reported an error");
                Ok(None)
            }
            other => Err(ProtocolError::UnexpectedMessage(format!(
                "{} is not valid from a client",
                other.type_name()
            ))),
        }
    }

    /// Publishes `document` as `version` of `ir_id` to every session
    ///
    /// Each session receives an `update` followed by a `reload` carrying
    /// `preserve_state`. Sessions whose buffer is full miss the update and
    /// get a full snapshot next time.
    pub fn push(
        &self,
        ir_id: &str,
        version: u64,
        document: &IrDocument,
        preserve_state: bool,
    ) -> PushReport {
        let previous = self.published.insert(
            ir_id.to_string(),
            Published {
                version,
                document: document.clone(),
            },
        );
        let full = SchemaUpdate::full(ir_id, version, document.clone());
        let patch = previous.map(|prev| {
            SchemaUpdate::delta(ir_id, version, prev.version, delta::diff(&prev.document, document))
        });

        let mut report = PushReport::default();
        for mut session in self.sessions.iter_mut() {
            let acked = session.acked.get(ir_id).copied();
            let (update, is_delta) = match &patch {
                Some(p) if acked == p.base_version => (p.clone(), true),
                _ => (full.clone(), false),
            };

            let sent = session
                .outbound
                .try_send(ProtocolMessage::update(update))
                .and_then(|()| session.outbound.try_send(ProtocolMessage::reload(preserve_state)));
            match sent {
                Ok(()) if is_delta => report.delta += 1,
                Ok(()) => report.full += 1,
                Err(e) => {
                    warn!(session_id = %session.key(), error = %e, "dropping update for stalled session");
                    session.acked.remove(ir_id);
                    report.dropped += 1;
                }
            }
        }
        debug!(%ir_id, version, ?report, "update pushed");
        report
    }

    /// Latest published version of `ir_id`
    pub fn published_version(&self, ir_id: &str) -> Option<u64> {
        self.published.get(ir_id).map(|p| p.version)
    }

    /// Forgets a published document, e.g. after its source file was deleted
    pub fn forget(&self, ir_id: &str) {
        self.published.remove(ir_id);
        for mut session in self.sessions.iter_mut() {
            session.acked.remove(ir_id);
        }
    }

    /// Drops sessions idle for longer than the session timeout
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|session_id, session| {
            let alive = now.duration_since(session.last_seen) <= self.session_timeout
                && !session.outbound.is_closed();
            if !alive {
                info!(%session_id, "sweeping idle hot-reload session");
            }
            alive
        });
        before - self.sessions.len()
    }
}
