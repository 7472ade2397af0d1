//! Newline-delimited frame transports

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use crate::error::IpcError;
use crate::protocol::{Frame, MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Reading half of an in-memory connection
pub type MemoryReader = FrameReader<ReadHalf<DuplexStream>>;

/// Writing half of an in-memory connection
pub type MemoryWriter = FrameWriter<WriteHalf<DuplexStream>>;

/// Reads enveloped frames, one per line
pub struct FrameReader<R> {
    inner: FramedRead<R, LinesCodec>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte stream, rejecting lines longer than `max_frame_bytes`
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: FramedRead::new(reader, LinesCodec::new_with_max_length(max_frame_bytes)),
            max_frame_bytes,
        }
    }

    /// Read the next frame; `Ok(None)` means the peer closed the stream
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, IpcError> {
        loop {
            let line = match self.inner.next().await {
                None => return Ok(None),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    return Err(IpcError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    })
                }
                Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let envelope: MessageEnvelope<Frame> = serde_json::from_str(line)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

            if !envelope.is_compatible() {
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(Some(envelope.message));
        }
    }
}

/// Writes enveloped frames, one per line
pub struct FrameWriter<W> {
    inner: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, LinesCodec::new()),
        }
    }

    /// Serialize and flush a single frame
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(frame);
        let json = serde_json::to_string(&envelope)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;

        self.inner.send(json).await.map_err(|e| match e {
            LinesCodecError::Io(e) => IpcError::from(e),
            LinesCodecError::MaxLineLengthExceeded => IpcError::InvalidMessage(e.to_string()),
        })
    }

    /// Flush and shut down the underlying stream so the peer observes EOF
    pub async fn close(&mut self) -> Result<(), IpcError> {
        SinkExt::<String>::close(&mut self.inner).await.map_err(|e| match e {
            LinesCodecError::Io(e) => IpcError::from(e),
            LinesCodecError::MaxLineLengthExceeded => IpcError::InvalidMessage(e.to_string()),
        })
    }
}

/// Frames over this process's stdin and stdout
pub fn stdio(max_frame_bytes: usize) -> (FrameReader<tokio::io::Stdin>, FrameWriter<tokio::io::Stdout>) {
    (
        FrameReader::new(tokio::io::stdin(), max_frame_bytes),
        FrameWriter::new(tokio::io::stdout()),
    )
}

/// Frames over a spawned child's piped stdout and stdin
pub fn child_process(
    child: &mut Child,
    max_frame_bytes: usize,
) -> Result<(FrameReader<ChildStdout>, FrameWriter<ChildStdin>), IpcError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| IpcError::IoError("child stdout is not piped".to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| IpcError::IoError("child stdin is not piped".to_string()))?;

    Ok((FrameReader::new(stdout, max_frame_bytes), FrameWriter::new(stdin)))
}

/// Two connected in-memory endpoints
pub fn in_memory_pair(max_frame_bytes: usize) -> ((MemoryReader, MemoryWriter), (MemoryReader, MemoryWriter)) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);

    (
        (FrameReader::new(left_read, max_frame_bytes), FrameWriter::new(left_write)),
        (FrameReader::new(right_read, max_frame_bytes), FrameWriter::new(right_write)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frame_crosses_in_memory_pair() {
        let ((_, mut left_writer), (mut right_reader, _)) = in_memory_pair(4096);

        let frame = Frame::Call {
            call_id: 1,
            service: 0,
            method: "Control/Ping".to_string(),
            payload: json!(null),
        };
        left_writer.write_frame(&frame).await.unwrap();

        let received = right_reader.read_frame().await.unwrap();
        assert_eq!(received, Some(frame));
    }

    #[tokio::test]
    async fn test_close_yields_end_of_stream() {
        let ((_, mut left_writer), (mut right_reader, _)) = in_memory_pair(4096);
        left_writer.close().await.unwrap();

        assert_eq!(right_reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(server, 4096);

        let line = json!({
            "protocol_version": IPC_PROTOCOL_VERSION + 1,
            "timestamp": "2024-01-01T00:00:00Z",
            "message": {"type": "reply", "call_id": 3, "payload": null}
        });
        client.write_all(format!("{}\n", line).as_bytes()).await.unwrap();

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, IpcError::ProtocolVersionMismatch { actual, .. } if actual == IPC_PROTOCOL_VERSION + 1));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(server, 64);

        client.write_all(&[b'x'; 200]).await.unwrap();
        client.write_all(b"\n").await.unwrap();

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, IpcError::FrameTooLarge { limit: 64 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_blank_lines_are_ignored() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(server, 4096);

        client.write_all(b"\n  \n").await.unwrap();
        let mut writer = FrameWriter::new(client);
        writer
            .write_frame(&Frame::Reply {
                call_id: 9,
                payload: json!(1),
            })
            .await
            .unwrap();

        assert_eq!(reader.read_frame().await.unwrap().map(|f| f.call_id()), Some(9));
    }
}
