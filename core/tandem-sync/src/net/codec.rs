//! Length-prefixed framing for direct channels.
//!
//! Each frame is a 4-byte big-endian length followed by the payload. The
//! payload of a data frame is an encoded change, passed through untouched;
//! the opening [`ChannelHello`](crate::protocol::ChannelHello) is JSON.

use serde::{Serialize, de::DeserializeOwned};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one frame, rejecting lengths above `max_len`.
pub async fn read_frame<T: AsyncRead + Unpin>(io: &mut T, max_len: usize) -> io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes"),
        ));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one frame and flushes.
pub async fn write_frame<T: AsyncWrite + Unpin>(
    io: &mut T,
    payload: &[u8],
    max_len: usize,
) -> io::Result<()> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }

    let len = payload.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(payload).await?;
    io.flush().await?;
    Ok(())
}

/// Reads a frame and decodes it as JSON.
pub async fn read_json<T, M>(io: &mut T, max_len: usize) -> io::Result<M>
where
    T: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let buf = read_frame(io, max_len).await?;
    serde_json::from_slice(&buf).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON decode error: {e}"),
        )
    })
}

/// Encodes `message` as JSON and writes it as a frame.
pub async fn write_json<T, M>(io: &mut T, message: &M, max_len: usize) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
    M: Serialize,
{
    let data = serde_json::to_vec(message).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON encode error: {e}"),
        )
    })?;
    write_frame(io, &data, max_len).await
}
