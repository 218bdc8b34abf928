//! Client side of the transport, used to reach the primary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use guard_core::Frame;
use guard_protocol::{Envelope, FrameCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::Encoder;
use tracing::debug;

use super::TransportError;

/// A connection to the primary, good for exactly one frame.
#[derive(Debug)]
pub struct ClientChannel {
    stream: UnixStream,
    endpoint: PathBuf,
}

impl ClientChannel {
    /// Connects to the primary listening at `endpoint`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Unavailable` if no socket exists or nobody
    ///   accepts on it (the primary is gone)
    /// - `TransportError::Io` for other socket failures
    pub async fn connect(endpoint: &Path) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(endpoint).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                TransportError::Unavailable {
                    endpoint: endpoint.to_path_buf(),
                }
            }
            _ => TransportError::Io(e),
        })?;

        Ok(Self {
            stream,
            endpoint: endpoint.to_path_buf(),
        })
    }

    /// Endpoint this channel is connected to.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Writes one envelope and closes the connection.
    ///
    /// Returns once the bytes are handed to the kernel; there is no reply.
    pub async fn send(mut self, envelope: Envelope, max_frame_bytes: usize) -> Result<(), TransportError> {
        let mut codec = FrameCodec::new(max_frame_bytes);
        let mut buf = BytesMut::new();
        codec.encode(envelope, &mut buf)?;

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        self.stream.shutdown().await?;

        debug!(endpoint = %self.endpoint.display(), bytes = buf.len(), "Frame handed to transport");
        Ok(())
    }
}

/// Connects to `endpoint` and sends `frame`, bounded by `limit`.
pub async fn send_frame(
    endpoint: &Path,
    frame: Frame,
    sender_pid: u32,
    max_frame_bytes: usize,
    limit: Duration,
) -> Result<(), TransportError> {
    let ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
    let envelope = Envelope::new(frame, sender_pid);

    timeout(limit, async {
        let channel = ClientChannel::connect(endpoint).await?;
        channel.send(envelope, max_frame_bytes).await
    })
    .await
    .map_err(|_| TransportError::Timeout { ms })?
}
