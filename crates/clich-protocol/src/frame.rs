//! Newline-delimited framing.
//!
//! A frame is every byte up to the next `\n` or `\r\n`. Both forms are
//! delimiters, so the `\r` of a CRLF is never part of the frame.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;

/// Default maximum frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Reads the next frame.
///
/// Returns `Ok(None)` on a clean end of stream. A final frame without a
/// trailing delimiter is returned as-is. Never buffers more than
/// `max_size + 2` bytes for a single frame.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_size.saturating_add(2);
    let mut buf = Vec::new();

    let bytes_read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut buf)
        .await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if bytes_read >= limit {
        return Err(ProtocolError::FrameTooLarge {
            size: bytes_read,
            max: max_size,
        });
    }

    if buf.len() > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: buf.len(),
            max: max_size,
        });
    }

    Ok(Some(buf))
}

/// Writes one frame followed by the delimiter, then flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
