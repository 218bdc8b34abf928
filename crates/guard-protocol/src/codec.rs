//! Length-delimited framing for envelopes.
//!
//! Each envelope is written as a 4-byte big-endian length followed by its
//! JSON body. The length prefix makes the body boundary unambiguous even
//! though a connection only ever carries one frame.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::envelope::Envelope;
use crate::error::ProtocolError;

/// Default upper bound for one encoded envelope (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Codec turning envelopes into length-prefixed byte frames and back.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Creates a codec rejecting bodies above `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(max_frame_bytes)
            .new_codec();
        Self {
            inner,
            max_frame_bytes,
        }
    }

    fn map_length_error(&self, e: std::io::Error) -> ProtocolError {
        if e.kind() == std::io::ErrorKind::InvalidData {
            ProtocolError::FrameTooLarge {
                max: self.max_frame_bytes,
            }
        } else {
            ProtocolError::Io(e)
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = Bytes::from(item.to_vec()?);
        if body.len() > self.max_frame_bytes {
            return Err(ProtocolError::FrameTooLarge {
                max: self.max_frame_bytes,
            });
        }
        self.inner
            .encode(body, dst)
            .map_err(|e| self.map_length_error(e))
    }
}

impl Decoder for FrameCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let body = match self.inner.decode(src) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.map_length_error(e)),
        };
        Envelope::from_slice(&body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::Frame;

    fn envelope(payload: &str) -> Envelope {
        Envelope::new(Frame::new("h", Some(payload.to_string())).unwrap(), 1)
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(envelope("hello"), &mut buf).unwrap();

        let full = buf.split();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.frame.payload_str(), Some("hello"));
    }

    #[test]
    fn test_oversized_frame_rejected_on_encode() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::new();
        let err = codec.encode(envelope(&"x".repeat(256)), &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 64 }));
    }

    #[test]
    fn test_oversized_length_prefix_rejected_on_decode() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&10_000u32.to_be_bytes());
        buf.extend_from_slice(b"{}");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }
}
