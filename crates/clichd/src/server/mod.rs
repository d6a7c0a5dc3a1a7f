//! Listeners for the clich daemon.
//!
//! Two front ends feed the same hub:
//! - [`HubServer`] accepts raw TCP connections speaking newline framing
//! - [`WsServer`](websocket::WsServer) accepts WebSocket upgrades, one
//!   message per frame
//!
//! Each allocates a connection handle and spawns a `ConnectionSession` per
//! peer. Both shut down via CancellationToken and wait, bounded by the
//! write timeout plus a grace period, for their sessions to tear down.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    HubServer    │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  register / publish  ┌─────────────────┐
//! │ConnectionSession│─────────────────────▶│  BroadcastHub   │
//! │   (per peer)    │                      │ (ClientRegistry)│
//! └─────────────────┘                      └────────┬────────┘
//!                                                   │ fan-out
//!                                                   ▼
//!                                          ┌─────────────────┐
//!                                          │  all peers      │
//!                                          └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting

mod session;
pub mod websocket;

pub use session::{ConnectionSession, HandshakeError, SessionError, SessionState};
pub use websocket::WsServer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::hub::BroadcastHub;

/// Extra time sessions get to finish tearing down after shutdown, on top of
/// the write timeout that bounds their final transport shutdown.
const SESSION_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// TCP front end of the hub.
pub struct HubServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: Arc<BroadcastHub>,
    cancel_token: CancellationToken,
    sessions: TaskTracker,
}

impl HubServer {
    /// Binds the listener.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to listen on (`"127.0.0.1:0"` picks a free port)
    /// * `hub` - The shared broadcast hub
    /// * `cancel_token` - Token for graceful shutdown
    pub async fn bind(
        addr: &str,
        hub: Arc<BroadcastHub>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let bind_error = |e: std::io::Error| ServerError::Bind {
            addr: addr.to_string(),
            error: e.to_string(),
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            hub,
            cancel_token,
            sessions: TaskTracker::new(),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until the cancellation token is triggered, then
    /// waits (bounded) for the open sessions to tear down.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Hub server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.handle_connection(stream, peer_addr),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        // Sessions observe the same token and deregister themselves
        info!(
            sessions = self.sessions.len(),
            "Server stopped accepting connections"
        );
        drain_sessions(&self.sessions, self.hub.config().write_timeout()).await;
        info!(
            remaining = self.hub.connection_count(),
            "Server stopped"
        );
        Ok(())
    }

    /// Spawns a session task for an accepted connection.
    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn_id = self.hub.next_connection_id();
        debug!(conn_id = %conn_id, peer = %peer_addr, "Accepted connection");

        let (reader, writer) = stream.into_split();
        let session = ConnectionSession::new(
            conn_id,
            reader,
            writer,
            Arc::clone(&self.hub),
            self.cancel_token.child_token(),
        );

        self.sessions.spawn(session.run());
    }
}

/// Stops tracking new sessions and waits for the running ones to finish.
pub(crate) async fn drain_sessions(sessions: &TaskTracker, write_timeout: Duration) {
    sessions.close();
    if timeout(write_timeout + SESSION_DRAIN_GRACE, sessions.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = sessions.len(),
            "Sessions still running after shutdown grace period"
        );
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Listener failed: {0}")]
    Serve(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:1".to_string(),
            error: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()));
        let server = HubServer::bind("127.0.0.1:0", hub, CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()));
        let result = HubServer::bind("not an address", hub, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()));
        let cancel = CancellationToken::new();
        let server = HubServer::bind("127.0.0.1:0", hub, cancel.clone())
            .await
            .unwrap();

        let task = tokio::spawn(server.run());
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_waits_for_sessions_to_close() {
        use clich_protocol::{read_frame, write_frame};
        use tokio::io::BufReader;

        let hub = Arc::new(BroadcastHub::new(HubConfig::default()));
        let cancel = CancellationToken::new();
        let server = HubServer::bind("127.0.0.1:0", Arc::clone(&hub), cancel.clone())
            .await
            .unwrap();
        let addr = server.local_addr();
        let task = tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        write_frame(&mut writer, br#"{"id":"a"}"#).await.unwrap();
        for _ in 0..100 {
            if hub.connection_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(hub.connection_count(), 1);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());

        // Once run() returns, every session has deregistered and shut down
        assert_eq!(hub.connection_count(), 0);
        let eof = timeout(Duration::from_secs(1), read_frame(&mut reader, 64))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(eof, None);
    }
}
