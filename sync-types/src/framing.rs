//! Length-prefixed framing over any async byte stream.
//!
//! Frame layout: `[u32 BE length][MessagePack Message]`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Message, SyncError};

/// Maximum accepted frame payload (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Room reserved in a frame for the `AssetChunk` envelope around its bytes.
pub const CHUNK_ENVELOPE_OVERHEAD: usize = 1024;

/// Largest chunk payload that still fits in one frame.
pub const MAX_CHUNK_PAYLOAD: usize = MAX_FRAME_SIZE - CHUNK_ENVELOPE_OVERHEAD;

/// Read one message.
///
/// Returns `Ok(None)` on a clean end of stream before any length byte.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, SyncError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SyncError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(SyncError::Io)?;
    Message::from_bytes(&buf).map(Some)
}

/// Write one message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), SyncError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.to_bytes()?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(SyncError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let len = (bytes.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(SyncError::Io)?;
    writer.write_all(&bytes).await.map_err(SyncError::Io)?;
    writer.flush().await.map_err(SyncError::Io)?;
    Ok(())
}
