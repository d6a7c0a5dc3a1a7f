//! Frame-level transport seam.
//!
//! Sessions and the hub never touch sockets directly. A transport is split
//! into a [`FrameSource`] (owned by the session's read loop) and a
//! [`FrameSink`] (owned by the peer's [`PeerConnection`](crate::hub::PeerConnection)).
//!
//! Two transports exist:
//! - newline-delimited byte streams ([`LineSource`] / [`LineSink`]), used by
//!   the TCP listener and by in-memory pipes in tests
//! - WebSocket messages, see [`crate::server::websocket`]

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use clich_protocol::{read_frame, write_frame, ProtocolError};

/// Inbound half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` once the peer closed the transport.
    async fn next_frame(&mut self, max_size: usize) -> Result<Option<Vec<u8>>, ProtocolError>;
}

/// Outbound half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one complete frame.
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Closes the outbound direction.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Reads newline-delimited frames from a byte stream.
pub struct LineSource<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for LineSource<R> {
    async fn next_frame(&mut self, max_size: usize) -> Result<Option<Vec<u8>>, ProtocolError> {
        read_frame(&mut self.reader, max_size).await
    }
}

/// Writes newline-delimited frames to a byte stream.
pub struct LineSink<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for LineSink<W> {
    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        write_frame(&mut self.writer, frame).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
