//! Length-prefixed framing for [`Message`] envelopes over byte streams.
//!
//! Each frame is a 4-byte big-endian length followed by the MessagePack
//! envelope. Used on worker stdin/stdout pipes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PoolError;
use crate::message::Message;

/// Upper bound on a single frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Encode a message into a complete frame (length prefix included).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, PoolError> {
    let body = message.to_bytes()?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(PoolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), PoolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message. Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, PoolError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_BYTES {
        return Err(PoolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Message::from_bytes(&body).map(Some)
}
