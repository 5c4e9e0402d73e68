//! Frame encoding and stream I/O.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use types::{CellError, Envelope, Result};

/// Default maximum frame size: 16MB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;

/// Deserialize an envelope from a frame body (without the length prefix).
pub fn decode_envelope(body: &[u8]) -> Result<Envelope> {
    bincode::deserialize(body)
        .map_err(|e| CellError::decode(format!("envelope deserialization failed: {}", e)))
}

/// Reads one envelope per frame from an async stream, reusing its buffer
/// across reads.
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_bytes,
        }
    }

    /// Read the next complete frame and decode it.
    pub async fn read(&mut self) -> Result<Envelope> {
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
        self.inner
            .read_exact(&mut prefix)
            .await
            .map_err(|e| CellError::io("failed to read frame length", e))?;

        let frame_len = u32::from_be_bytes(prefix) as usize;
        if frame_len > self.max_frame_bytes {
            return Err(CellError::decode(format!(
                "frame size {} exceeds maximum {}",
                frame_len, self.max_frame_bytes
            )));
        }

        if self.buffer.capacity() < frame_len {
            self.buffer.reserve(frame_len - self.buffer.capacity());
        }
        self.buffer.resize(frame_len, 0);
        self.inner
            .read_exact(&mut self.buffer)
            .await
            .map_err(|e| CellError::io("failed to read frame body", e))?;

        trace!(bytes = frame_len, "read envelope frame");
        decode_envelope(&self.buffer.split_to(frame_len))
    }
}

/// Writes envelopes as frames onto an async stream, reusing its buffer
/// across writes.
pub struct FrameWriter<W> {
    inner: W,
    buffer: BytesMut,
    max_frame_bytes: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_bytes,
        }
    }

    /// Encode and write one envelope, flushing so the frame is on the wire
    /// when this returns.
    pub async fn write(&mut self, envelope: &Envelope) -> Result<()> {
        let body = bincode::serialize(envelope)
            .map_err(|e| CellError::decode(format!("envelope serialization failed: {}", e)))?;
        if body.len() > self.max_frame_bytes {
            return Err(CellError::decode(format!(
                "frame size {} exceeds maximum {}",
                body.len(),
                self.max_frame_bytes
            )));
        }

        self.buffer.clear();
        self.buffer
            .extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(&body);

        self.inner
            .write_all(&self.buffer)
            .await
            .map_err(|e| CellError::io("failed to write frame", e))?;
        self.inner
            .flush()
            .await
            .map_err(|e| CellError::io("failed to flush frame", e))?;

        trace!(bytes = body.len(), "wrote envelope frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{CellAddress, CellPath, Payload};

    fn sample_envelope() -> Envelope {
        Envelope::request(
            CellAddress::qualified("client", "doors"),
            CellPath::single(CellAddress::qualified("pool", "store")),
            Payload::bytes("poolio-request", vec![1, 2, 3, 4]),
        )
    }

    #[tokio::test]
    async fn test_frames_survive_partial_reads() {
        // A tiny duplex buffer forces the frame across many partial
        // reads and writes.
        let (client, server) = tokio::io::duplex(16);
        let mut writer = FrameWriter::new(client, DEFAULT_MAX_FRAME_BYTES);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_BYTES);

        let sent = sample_envelope();
        let send = sent.clone();
        let write_task = tokio::spawn(async move {
            writer.write(&send).await.unwrap();
        });

        let received = reader.read().await.unwrap();
        assert_eq!(received, sent);
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_preserve_order() {
        let (client, server) = tokio::io::duplex(256);
        let mut writer = FrameWriter::new(client, DEFAULT_MAX_FRAME_BYTES);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_BYTES);

        let envelopes: Vec<Envelope> = (0..8)
            .map(|i| {
                Envelope::request(
                    CellAddress::qualified("client", "doors"),
                    CellPath::single(CellAddress::qualified("pool", "store")),
                    Payload::Text(format!("frame {}", i)),
                )
            })
            .collect();

        let to_send = envelopes.clone();
        let write_task = tokio::spawn(async move {
            for env in &to_send {
                writer.write(env).await.unwrap();
            }
        });

        for expected in &envelopes {
            let received = reader.read().await.unwrap();
            assert_eq!(&received, expected);
        }
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_by_reader() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 16);

        // Hand-craft a prefix claiming a frame far beyond the limit.
        client.write_all(&(1024u32).to_be_bytes()).await.unwrap();

        let err = reader.read().await.unwrap_err();
        assert_eq!(err.category(), "decode");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_by_writer() {
        let (client, _server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client, 8);

        let err = writer.write(&sample_envelope()).await.unwrap_err();
        assert_eq!(err.category(), "decode");
    }

    #[test]
    fn test_garbage_body_is_decode_failure() {
        let err = decode_envelope(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert_eq!(err.category(), "decode");
    }
}
