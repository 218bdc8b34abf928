//! Local transport between secondaries and the primary.
//!
//! The primary binds a Unix socket named after the application handle;
//! any process knowing the handle can connect to it. Every connection
//! carries exactly one length-prefixed envelope and is then closed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   connect + 1 envelope   ┌─────────────────┐
//! │  ClientChannel  │─────────────────────────▶│  ServerChannel  │
//! │  (secondary)    │                          │  (primary)      │
//! └─────────────────┘                          └────────┬────────┘
//!                                                       │ accept()
//!                                                       ▼
//!                                              ┌─────────────────┐
//!                                              │InboundConnection│
//!                                              │  read_envelope  │
//!                                              └─────────────────┘
//! ```

mod client;
mod server;

pub use client::{send_frame, ClientChannel};
pub use server::{InboundConnection, ServerChannel};

use std::path::PathBuf;

use guard_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the transport channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nobody is listening at the endpoint.
    #[error("No listener at {}", endpoint.display())]
    Unavailable { endpoint: PathBuf },

    /// The primary could not bind its socket.
    #[error("Failed to bind socket at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation exceeded its time bound.
    #[error("Transport operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The peer closed the connection without sending anything.
    #[error("Connection closed before a frame was sent")]
    EmptyConnection,

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Underlying socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
