//! Registration identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique id of a message registration.
///
/// Ids are assigned monotonically starting at 1 and never reused within
/// the lifetime of a registry. `0` is the "not yet registered" sentinel so
/// holders can tell a fresh value from a live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Sentinel for "not registered".
    pub const UNREGISTERED: MessageId = MessageId(0);

    /// First id handed out by a registry.
    pub const FIRST: MessageId = MessageId(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns false for the sentinel.
    #[must_use]
    pub const fn is_registered(self) -> bool {
        self.0 != 0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
