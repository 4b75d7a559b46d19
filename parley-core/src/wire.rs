//! Framing: length-prefix (4 bytes BE) + bincode payload.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;
use crate::protocol::Message;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into a single frame: 4 bytes BE length + bincode payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, SessionError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(SessionError::FrameTooLarge);
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a frame payload (the bytes after the length prefix).
pub fn decode_payload(bytes: &[u8]) -> Result<Message, SessionError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Write one framed message to the connection.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await.map_err(SessionError::from_io)?;
    writer.flush().await.map_err(SessionError::from_io)?;
    Ok(())
}

/// Read one framed message. Exactly 4 prefix bytes, then exactly the
/// advertised number of payload bytes. EOF at the prefix is an orderly peer
/// close; EOF mid-payload is a message truncated in transit. Both surface as
/// `ConnectionClosed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_SIZE];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(SessionError::from_io)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(SessionError::FrameTooLarge);
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(SessionError::from_io)?;
    decode_payload(&payload)
}
