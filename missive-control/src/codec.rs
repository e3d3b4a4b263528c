//! Length-prefixed bincode framing shared by the client and server
//!
//! Every message on the control socket is a 4-byte big-endian length
//! followed by a bincode-encoded payload. Frames over the size bound are
//! refused before any allocation.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Upper bound on a request frame (1MB)
///
/// A submit request carries the whole batch, so this bounds batch size at
/// the wire level too.
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Upper bound on a response frame (10MB)
///
/// Generous enough for a full job listing with per-record outcomes.
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Write one frame to the stream.
pub(crate) async fn write_frame<S, T>(stream: &mut S, message: &T) -> Result<()>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serde::encode_to_vec(message, bincode::config::legacy())?;
    let len = u32::try_from(bytes.len())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    Ok(())
}

/// Read one frame from the stream, refusing frames over `limit` bytes.
///
/// A clean EOF before the length prefix reads as `ConnectionClosed`.
pub(crate) async fn read_frame<S, T>(stream: &mut S, limit: u32) -> Result<T>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);
    if len > limit {
        return Err(ControlError::FrameTooLarge { size: len, limit });
    }

    let mut bytes = vec![0u8; len as usize];
    stream.read_exact(&mut bytes).await?;

    let (message, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())?;
    Ok(message)
}
