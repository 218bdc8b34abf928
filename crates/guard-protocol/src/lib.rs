//! app-guard protocol - wire format for frames sent to the primary
//!
//! A sender opens a fresh connection to the primary's socket, writes one
//! length-prefixed JSON [`Envelope`] and closes the connection. The
//! primary decodes it with [`FrameCodec`] and routes the inner frame.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod version;

pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_BYTES};
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use version::ProtocolVersion;
