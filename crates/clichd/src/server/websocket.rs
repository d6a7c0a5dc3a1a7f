//! WebSocket listener.
//!
//! Serves a single upgrade route (`/ws` by default). Every upgraded socket
//! becomes a [`ConnectionSession`] in which one WebSocket message is one
//! frame: the first message carries the JSON handshake and every later
//! message is relayed as-is. Frames that are valid UTF-8 go out as text
//! messages, anything else as binary.
//!
//! ```text
//! GET /ws  ──upgrade──▶ WsSource / WsSink ──▶ ConnectionSession ──▶ BroadcastHub
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use clich_protocol::ProtocolError;

use super::{drain_sessions, ConnectionSession, ServerError};
use crate::hub::BroadcastHub;
use crate::transport::{FrameSink, FrameSource};

/// Inbound half of an upgraded socket.
pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

impl WsSource {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self, max_size: usize) -> Result<Option<Vec<u8>>, ProtocolError> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(None);
            };

            let frame = match message.map_err(|e| io::Error::new(io::ErrorKind::Other, e))? {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Close(_) => return Ok(None),
                // Pongs are queued by the socket itself
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            if frame.len() > max_size {
                return Err(ProtocolError::FrameTooLarge {
                    size: frame.len(),
                    max: max_size,
                });
            }
            return Ok(Some(frame));
        }
    }
}

/// Outbound half of an upgraded socket.
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let message = match std::str::from_utf8(frame) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(frame.to_vec()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[derive(Clone)]
struct WsState {
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
    sessions: TaskTracker,
}

/// WebSocket front end of the hub.
pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
    hub: Arc<BroadcastHub>,
    cancel_token: CancellationToken,
    sessions: TaskTracker,
}

impl WsServer {
    /// Binds the listener. `path` is the upgrade route, e.g. `/ws`.
    pub async fn bind(
        addr: &str,
        path: &str,
        hub: Arc<BroadcastHub>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let bind_error = |e: io::Error| ServerError::Bind {
            addr: addr.to_string(),
            error: e.to_string(),
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        Ok(Self {
            listener,
            local_addr,
            path: path.to_string(),
            hub,
            cancel_token,
            sessions: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves upgrades until the cancellation token is triggered, then waits
    /// (bounded) for the open sessions to tear down.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            local_addr,
            path,
            hub,
            cancel_token,
            sessions,
        } = self;

        let grace = hub.config().write_timeout();
        let state = WsState {
            hub,
            cancel: cancel_token.clone(),
            sessions: sessions.clone(),
        };
        let app = Router::new().route(&path, get(upgrade)).with_state(state);

        info!(addr = %local_addr, path = %path, "WebSocket listener ready");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        drain_sessions(&sessions, grace).await;
        info!("WebSocket listener stopped");
        Ok(())
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    let max_size = state.hub.config().max_frame_size;
    ws.max_message_size(max_size).on_upgrade(move |socket| {
        let sessions = state.sessions.clone();
        sessions.track_future(serve_socket(socket, state))
    })
}

async fn serve_socket(socket: WebSocket, state: WsState) {
    let conn_id = state.hub.next_connection_id();
    debug!(conn_id = %conn_id, "Accepted WebSocket connection");

    let (sink, stream) = socket.split();
    let session = ConnectionSession::from_transport(
        conn_id,
        Box::new(WsSource::new(stream)),
        Box::new(WsSink::new(sink)),
        state.hub,
        state.cancel.child_token(),
    );
    session.run().await;
}
