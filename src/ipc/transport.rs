//! Length-prefixed message framing
//!
//! Every message is a little-endian `u32` byte count followed by a JSON
//! body. The same framing runs over in-memory duplex pipes (thread
//! isolation) and child stdin/stdout (process isolation).

use std::io;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default maximum message size (10 MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Convert a configured megabyte limit into a frame limit
pub fn limit_from_mb(mb: usize) -> u32 {
    u32::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(u32::MAX)
}

/// Send a length-prefixed message
pub async fn send_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    limit: u32,
) -> io::Result<()> {
    if data.len() > limit as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Message too large: {} bytes", data.len()),
        ));
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Receive a length-prefixed message
pub async fn recv_message<R: AsyncReadExt + Unpin>(reader: &mut R, limit: u32) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);

    if len > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Serialize and send one message
pub async fn send_json<W, T>(writer: &mut W, value: &T, limit: u32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    send_message(writer, &json, limit).await
}

/// Receive and deserialize one message
pub async fn recv_json<R, T>(reader: &mut R, limit: u32) -> io::Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let data = recv_message(reader, limit).await?;
    serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut output = Vec::new();
        send_message(&mut output, b"{}", MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(output, vec![2, 0, 0, 0, b'{', b'}']);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_keep_order() {
        let mut output = Vec::new();
        send_json(&mut output, &serde_json::json!({"n": 1}), MAX_MESSAGE_SIZE)
            .await
            .unwrap();
        send_json(&mut output, &serde_json::json!({"n": 2}), MAX_MESSAGE_SIZE)
            .await
            .unwrap();

        let mut reader = Cursor::new(output);
        let first: serde_json::Value = recv_json(&mut reader, MAX_MESSAGE_SIZE).await.unwrap();
        let second: serde_json::Value = recv_json(&mut reader, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 2);

        let eof = recv_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap_err();
        assert_eq!(eof.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut data = 64u32.to_le_bytes().to_vec();
        data.extend(std::iter::repeat(b'x').take(64));
        let mut reader = Cursor::new(data);
        let err = recv_message(&mut reader, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut output = Vec::new();
        let err = send_message(&mut output, &[0u8; 32], 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(output.is_empty());
    }
}
