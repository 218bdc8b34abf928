//! Protocol errors.

use thiserror::Error;

use crate::version::ProtocolVersion;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The bytes did not decode into a valid envelope
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The sender speaks an incompatible protocol
    #[error("Incompatible protocol version {got} (expected {expected})")]
    IncompatibleVersion {
        got: ProtocolVersion,
        expected: ProtocolVersion,
    },

    /// Encoded envelope exceeds the configured limit
    #[error("Frame exceeds maximum size of {max} bytes")]
    FrameTooLarge { max: usize },

    /// Serialization failed on the sending side
    #[error("Failed to serialize frame: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors caused by the bytes received rather than local I/O.
    ///
    /// The listener drops such frames and keeps accepting.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_) | Self::IncompatibleVersion { .. } | Self::FrameTooLarge { .. }
        )
    }
}
