//! Outbound side of a connection.
//!
//! A [`PeerConnection`] is the handle stored in the registry: the
//! connection id plus the outbound half of the transport. Writes from
//! concurrent fan-outs are serialized by the sink mutex, and every write
//! (including the wait for the mutex) is bounded by a timeout.
//!
//! A peer is closed either by its own session or by the hub after a failed
//! write. Both paths trip the same signal, which the session's read loop
//! watches, so a peer dropped by the hub stops reading too.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use clich_core::ConnectionId;

use crate::transport::{FrameSink, LineSink};

/// Outbound handle for one live connection.
pub struct PeerConnection {
    id: ConnectionId,
    sink: Mutex<Box<dyn FrameSink>>,

    /// Tripped once, by whoever closes the peer first
    closed: CancellationToken,

    /// Set once the sink has been shut down
    released: AtomicBool,
}

impl PeerConnection {
    /// Wraps the write half of a byte-stream transport (newline framing).
    pub fn new<W>(id: ConnectionId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_sink(id, Box::new(LineSink::new(writer)))
    }

    /// Wraps an arbitrary frame sink.
    pub fn with_sink(id: ConnectionId, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id,
            sink: Mutex::new(sink),
            closed: CancellationToken::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns true once the peer has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes once the peer has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Marks the peer closed without touching the transport.
    ///
    /// Later and queued deliveries fail with [`DeliveryError::Closed`], and
    /// the owning session is woken up to tear itself down.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Writes one frame, giving up after `limit`.
    pub async fn deliver(&self, frame: &[u8], limit: Duration) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            // Closed while we were queued behind another write
            if self.is_closed() {
                return Err(DeliveryError::Closed);
            }
            sink.send_frame(frame)
                .await
                .map_err(|e| DeliveryError::Write(e.to_string()))
        };

        match timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::WriteTimeout(limit)),
        }
    }

    /// Marks the connection closed and shuts down the outbound half.
    ///
    /// Frames still queued by an in-flight fan-out fail with
    /// [`DeliveryError::Closed`] instead of touching the transport.
    pub async fn close(&self, limit: Duration) {
        self.mark_closed();
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let shutdown = async {
            let mut sink = self.sink.lock().await;
            sink.shutdown().await
        };
        // A peer that is gone or stalled can't be shut down cleanly; dropping
        // the handle releases the transport either way.
        let _ = timeout(limit, shutdown).await;
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Errors delivering a frame to a single peer.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Write error: {0}")]
    Write(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Connection already closed")]
    Closed,
}
