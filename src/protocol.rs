//! Wire framing shared by the server and the client.
//!
//! Two framings travel over the same connected stream:
//!
//! - **Messages**: a 4-byte unsigned length prefix in network byte order
//!   followed by that many UTF-8 payload bytes. Used for every command,
//!   reply, and poll response.
//! - **Bulk transfers**: an 8-byte unsigned length prefix in network byte
//!   order followed by that many raw bytes. Used only for job output
//!   delivery, outside the message framing.
//!
//! Every function takes the stream it operates on explicitly; the module
//! holds no connection state, so concurrent use on different connections
//! needs no locking.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RelayError, Result};

/// Chunk size for streaming bulk payloads.
const BULK_CHUNK: usize = 4096;

/// Upper bound on a single message frame. Commands, replies, and poll
/// listings are all small; a peer announcing more than this is broken or
/// hostile, and the length must not be trusted as an allocation size.
/// Bulk transfers are streamed in chunks and carry no such bound.
pub const MAX_MESSAGE_LEN: u32 = 1 << 20;

/// Send one length-prefixed message.
pub async fn send_message<W>(stream: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_u32(message.len() as u32).await?;
    stream.write_all(message.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Receive one length-prefixed message.
///
/// End-of-stream before a complete frame is a [`RelayError::ConnectionClosed`].
/// A length prefix above [`MAX_MESSAGE_LEN`] is rejected before any payload
/// is allocated or read.
pub async fn recv_message<R>(stream: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = stream.read_u32().await.map_err(closed_on_eof)?;
    if len > MAX_MESSAGE_LEN {
        return Err(RelayError::OversizedFrame(len));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}

/// Send an in-memory payload as one bulk transfer.
pub async fn send_bulk<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_u64(payload.len() as u64).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Send a file's contents as one bulk transfer, streaming in chunks.
pub async fn send_bulk_file<W>(stream: &mut W, file: &mut tokio::fs::File) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = file.metadata().await?.len();
    stream.write_u64(len).await?;

    let mut buf = [0u8; BULK_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Receive one bulk transfer, streaming its bytes into `out` without
/// buffering the whole payload. Returns the transfer length.
pub async fn recv_bulk<R, W>(stream: &mut R, out: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let len = stream.read_u64().await.map_err(closed_on_eof)?;

    let mut remaining = len;
    let mut buf = [0u8; BULK_CHUNK];
    while remaining > 0 {
        let want = remaining.min(BULK_CHUNK as u64) as usize;
        let n = stream.read(&mut buf[..want]).await.map_err(closed_on_eof)?;
        if n == 0 {
            return Err(RelayError::ConnectionClosed);
        }
        out.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    out.flush().await?;
    Ok(len)
}

fn closed_on_eof(e: std::io::Error) -> RelayError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RelayError::ConnectionClosed
    } else {
        RelayError::Io(e)
    }
}
