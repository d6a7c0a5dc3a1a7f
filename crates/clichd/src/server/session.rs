//! Per-connection session.
//!
//! Each accepted transport gets its own `ConnectionSession` that:
//! - Reads the identity handshake (no lock held, bounded by a timeout)
//! - Verifies the credential when the hub requires one
//! - Registers the client with the hub
//! - Relays every inbound frame through `BroadcastHub::publish`
//! - Deregisters, then shuts the transport down
//!
//! # State machine
//!
//! ```text
//! Connecting ──handshake ok──▶ Active ──eof / error / shutdown──▶ Closed
//!     │                                                            ▲
//!     └──────────── bad handshake / timeout / rejected ────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use clich_core::{ClientIdentity, ConnectionId};
use clich_protocol::{Handshake, ProtocolError};

use crate::auth::{self, AuthError};
use crate::hub::{BroadcastHub, PeerConnection};
use crate::registry::RegistryError;
use crate::transport::{FrameSink, FrameSource, LineSink, LineSource};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Session for a single transport connection.
pub struct ConnectionSession {
    /// Handle shared with the registry
    peer: Arc<PeerConnection>,

    /// Inbound half, owned exclusively by this session
    source: Box<dyn FrameSource>,

    hub: Arc<BroadcastHub>,

    /// Cancelled on daemon shutdown
    cancel: CancellationToken,

    state: SessionState,
}

impl ConnectionSession {
    /// Creates a session for an accepted byte-stream transport using
    /// newline framing.
    ///
    /// # Arguments
    ///
    /// * `conn_id` - Handle allocated by the hub for this transport
    /// * `reader` - Read half of the transport
    /// * `writer` - Write half of the transport
    /// * `hub` - The shared broadcast hub
    /// * `cancel` - Token cancelled on daemon shutdown
    pub fn new<R, W>(
        conn_id: ConnectionId,
        reader: R,
        writer: W,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_transport(
            conn_id,
            Box::new(LineSource::new(reader)),
            Box::new(LineSink::new(writer)),
            hub,
            cancel,
        )
    }

    /// Creates a session over an already framed transport.
    pub fn from_transport(
        conn_id: ConnectionId,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer: Arc::new(PeerConnection::with_sink(conn_id, sink)),
            source,
            hub,
            cancel,
            state: SessionState::Connecting,
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.peer.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion.
    ///
    /// Returns the identity of the client if it was admitted, `None` if the
    /// connection never got past the handshake.
    pub async fn run(mut self) -> Option<ClientIdentity> {
        let conn_id = self.conn_id();
        debug!(conn_id = %conn_id, "New connection");

        let identity = match self.admit().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "Handshake failed");
                self.close().await;
                return None;
            }
        };

        self.state = SessionState::Active;
        info!(
            conn_id = %conn_id,
            client_id = %identity.id,
            name = %identity.label(),
            "Client connected"
        );

        match self.read_loop(&identity).await {
            Ok(()) => debug!(conn_id = %conn_id, "Client closed the connection"),
            Err(e) => debug!(conn_id = %conn_id, error = %e, "Connection closed"),
        }

        self.close().await;
        info!(conn_id = %conn_id, client_id = %identity.id, "Client disconnected");
        Some(identity)
    }

    /// Connecting: handshake, optional credential check, registration.
    async fn admit(&mut self) -> Result<ClientIdentity, HandshakeError> {
        let config = self.hub.config();
        let limit = config.handshake_timeout();
        let max_size = config.max_frame_size;

        let line = tokio::select! {
            _ = self.cancel.cancelled() => return Err(HandshakeError::Shutdown),
            result = timeout(limit, self.source.next_frame(max_size)) => match result {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Err(HandshakeError::Eof),
                Ok(Err(e)) => return Err(HandshakeError::Protocol(e)),
                Err(_) => return Err(HandshakeError::Timeout(limit)),
            },
        };

        let (identity, token) = Handshake::decode(&line)?.into_parts();

        if let Some(verifier) = self.hub.verifier() {
            let principal = auth::authorize(verifier.as_ref(), &identity, token.as_deref()).await?;
            debug!(
                conn_id = %self.conn_id(),
                principal = %principal.id,
                "Credential verified"
            );
        }

        self.hub.register(Arc::clone(&self.peer), identity.clone())?;
        Ok(identity)
    }

    /// Active: relay frames until the peer goes away, the hub drops it or
    /// the daemon stops.
    async fn read_loop(&mut self, identity: &ClientIdentity) -> Result<(), SessionError> {
        let conn_id = self.conn_id();
        let cancel = self.cancel.clone();
        let peer = Arc::clone(&self.peer);
        let idle = self.hub.config().idle_timeout();
        let max_size = self.hub.config().max_frame_size;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(conn_id = %conn_id, "Session shutting down");
                    return Ok(());
                }
                _ = peer.closed() => return Err(SessionError::Dropped),
                result = next_frame(self.source.as_mut(), max_size, idle) => result?,
            };

            let Some(frame) = next else {
                return Ok(());
            };

            // Blank lines keep the connection alive but are not relayed
            if frame.is_empty() {
                continue;
            }

            debug!(
                conn_id = %conn_id,
                client_id = %identity.id,
                bytes = frame.len(),
                "Received frame"
            );
            trace!(conn_id = %conn_id, frame = %String::from_utf8_lossy(&frame), "Frame contents");

            self.hub.publish(conn_id, Arc::from(frame)).await;
        }
    }

    /// Closed: deregister first, then release the transport.
    async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.hub.deregister(self.conn_id());
        self.peer.close(self.hub.config().write_timeout()).await;
    }
}

async fn next_frame(
    source: &mut dyn FrameSource,
    max_size: usize,
    idle: Option<Duration>,
) -> Result<Option<Vec<u8>>, SessionError> {
    let result = match idle {
        Some(limit) => timeout(limit, source.next_frame(max_size))
            .await
            .map_err(|_| SessionError::IdleTimeout(limit))?,
        None => source.next_frame(max_size).await,
    };

    result.map_err(|e| match e {
        ProtocolError::FrameTooLarge { size, max } => SessionError::FrameTooLarge { size, max },
        other => SessionError::Read(other.to_string()),
    })
}

/// Errors that end a session before it is admitted.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before handshake")]
    Eof,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Admission rejected: {0}")]
    Rejected(#[from] AuthError),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistryError),

    #[error("Daemon shutting down")]
    Shutdown,
}

/// Errors that end an active session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Read error: {0}")]
    Read(String),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("No frames received for {0:?}")]
    IdleTimeout(Duration),

    #[error("Dropped by the hub after a failed write")]
    Dropped,
}
