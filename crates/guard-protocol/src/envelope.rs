//! The envelope carrying a frame across the transport.

use chrono::{DateTime, Utc};
use guard_core::Frame;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::version::ProtocolVersion;

/// Serialized form of a [`Frame`].
///
/// Handle and payload are JSON strings, so any text (including newlines,
/// NUL and the length-prefix bytes themselves) survives the trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version of the sender
    pub protocol_version: ProtocolVersion,

    /// Process id of the sender
    pub sender_pid: u32,

    /// When the sender produced the envelope
    pub sent_at: DateTime<Utc>,

    /// The routed frame
    #[serde(flatten)]
    pub frame: Frame,
}

impl Envelope {
    /// Wraps a frame with the current protocol version and timestamp.
    pub fn new(frame: Frame, sender_pid: u32) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            sender_pid,
            sent_at: Utc::now(),
            frame,
        }
    }

    /// Serializes to JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes and validates an envelope body.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::MalformedFrame` for invalid JSON, invalid UTF-8 or
    ///   an empty message handle
    /// - `ProtocolError::IncompatibleVersion` when the major version differs
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        if !envelope
            .protocol_version
            .is_compatible_with(&ProtocolVersion::CURRENT)
        {
            return Err(ProtocolError::IncompatibleVersion {
                got: envelope.protocol_version,
                expected: ProtocolVersion::CURRENT,
            });
        }

        if envelope.frame.handle.is_empty() {
            return Err(ProtocolError::MalformedFrame(
                "empty message handle".to_string(),
            ));
        }

        Ok(envelope)
    }

    /// Consumes the envelope, returning the frame.
    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(handle: &str, payload: Option<&str>) -> Frame {
        Frame::new(handle, payload.map(str::to_string)).unwrap()
    }

    #[test]
    fn test_payload_with_delimiters_survives() {
        let payload = "line1\nline2\0\u{0}\"quoted\"\\{\"handle\":\"x\"}\u{1F600}";
        let env = Envelope::new(frame("args", Some(payload)), 42);
        let bytes = env.to_vec().unwrap();
        let decoded = Envelope::from_slice(&bytes).unwrap();
        assert_eq!(decoded.frame.payload_str(), Some(payload));
        assert_eq!(decoded.sender_pid, 42);
    }

    #[test]
    fn test_absent_payload_is_distinct_from_empty() {
        let none = Envelope::new(frame("h", None), 1).to_vec().unwrap();
        let empty = Envelope::new(frame("h", Some("")), 1).to_vec().unwrap();
        assert_eq!(Envelope::from_slice(&none).unwrap().frame.payload, None);
        assert_eq!(
            Envelope::from_slice(&empty).unwrap().frame.payload,
            Some(String::new())
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = Envelope::from_slice(b"\xff\xfe not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn test_empty_handle_is_malformed() {
        let json = serde_json::json!({
            "protocol_version": {"major": 1, "minor": 0},
            "sender_pid": 7,
            "sent_at": "2024-01-01T00:00:00Z",
            "handle": "",
        });
        let err = Envelope::from_slice(json.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let mut env = Envelope::new(frame("h", None), 1);
        env.protocol_version = ProtocolVersion::new(9, 0);
        let bytes = env.to_vec().unwrap();
        let err = Envelope::from_slice(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::IncompatibleVersion { .. }));
        assert!(err.is_malformed());
    }
}
