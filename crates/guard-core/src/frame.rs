//! Frame: one notification routed by message handle.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A single `(handle, payload)` notification.
///
/// Produced by a sender, consumed by the primary's dispatch listener.
/// Delivery is fire-and-forget; there is no acknowledgement frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Message handle used to route the frame to callbacks
    pub handle: String,

    /// Optional text payload
    #[serde(default)]
    pub payload: Option<String>,
}

impl Frame {
    /// Creates a frame, rejecting an empty message handle.
    pub fn new(handle: impl Into<String>, payload: Option<String>) -> DomainResult<Self> {
        let handle = handle.into();
        if handle.is_empty() {
            return Err(DomainError::EmptyMessageHandle);
        }
        Ok(Self { handle, payload })
    }

    /// Payload as a string slice, if present.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new() {
        let frame = Frame::new("open", Some("file.txt".to_string())).unwrap();
        assert_eq!(frame.handle, "open");
        assert_eq!(frame.payload_str(), Some("file.txt"));
    }

    #[test]
    fn test_frame_without_payload() {
        let frame = Frame::new("ping", None).unwrap();
        assert!(frame.payload_str().is_none());
    }

    #[test]
    fn test_empty_handle_rejected() {
        assert_eq!(Frame::new("", None), Err(DomainError::EmptyMessageHandle));
    }
}
