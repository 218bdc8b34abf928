//! Server side of the transport, owned by the primary.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use guard_protocol::{Envelope, FrameCodec, ProtocolError};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing::{debug, info};

use super::TransportError;

/// Initial read buffer; envelopes are usually small.
const READ_CHUNK: usize = 4 * 1024;

/// Listening endpoint bound to an application handle.
#[derive(Debug)]
pub struct ServerChannel {
    listener: UnixListener,
    path: PathBuf,
    /// (dev, ino) of the socket file created by `bind`.
    identity: Option<(u64, u64)>,
    unlinked: bool,
}

impl ServerChannel {
    /// Binds the socket at `path`.
    ///
    /// A leftover socket file from a crashed primary is removed first.
    /// Only the claim holder calls this, so nobody else can be bound there.
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        let bind_err = |source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            debug!(socket = %path.display(), "Removing stale socket file");
            std::fs::remove_file(path).map_err(bind_err)?;
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(bind_err)?;
            }
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        info!(socket = %path.display(), "Transport channel bound");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            identity: file_identity(path),
            unlinked: false,
        })
    }

    /// Path of the bound socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next inbound connection.
    ///
    /// Can be called repeatedly; the sequence of connections ends only when
    /// the channel is closed.
    pub async fn accept(&self) -> Result<InboundConnection, TransportError> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(InboundConnection { stream })
    }

    /// Stops listening and removes the socket file.
    ///
    /// A file that a newer primary has bound at the same path is left alone.
    /// Dropping the channel removes the file as well but cannot report
    /// failures.
    pub fn close(mut self) -> Result<(), TransportError> {
        self.unlink()
    }

    fn unlink(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.unlinked, true) {
            return Ok(());
        }
        if self.identity.is_some() && file_identity(&self.path) != self.identity {
            debug!(socket = %self.path.display(), "Socket file replaced, not removing");
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        if let Err(e) = self.unlink() {
            debug!(socket = %self.path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

fn file_identity(path: &Path) -> Option<(u64, u64)> {
    std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

/// One accepted connection carrying a single envelope.
#[derive(Debug)]
pub struct InboundConnection {
    stream: UnixStream,
}

impl InboundConnection {
    /// Reads the connection to completion and decodes one envelope.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if the sender stalls past `read_timeout`
    /// - `TransportError::EmptyConnection` if nothing was sent
    /// - `TransportError::Protocol` for undecodable, truncated or oversized
    ///   frames
    pub async fn read_envelope(
        mut self,
        max_frame_bytes: usize,
        read_timeout: Duration,
    ) -> Result<Envelope, TransportError> {
        let ms = u64::try_from(read_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(read_timeout, self.read_inner(max_frame_bytes))
            .await
            .map_err(|_| TransportError::Timeout { ms })?
    }

    async fn read_inner(&mut self, max_frame_bytes: usize) -> Result<Envelope, TransportError> {
        let mut codec = FrameCodec::new(max_frame_bytes);
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        loop {
            if let Some(envelope) = codec.decode(&mut buf)? {
                return Ok(envelope);
            }

            let n = self.stream.read_buf(&mut buf).await?;
            if n == 0 {
                if buf.is_empty() {
                    return Err(TransportError::EmptyConnection);
                }
                return Err(ProtocolError::MalformedFrame(format!(
                    "connection closed after {} bytes of a partial frame",
                    buf.len()
                ))
                .into());
            }
        }
    }
}
