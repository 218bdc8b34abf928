//! Application handle and message handle rules.
//!
//! The application handle names the OS-visible resources shared by every
//! copy of an application: the lock file used for the exclusive claim and
//! the socket the primary listens on. It therefore has to be a safe file
//! name component.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Message handles starting with this prefix belong to the engine.
pub const RESERVED_PREFIX: &str = "app-guard.";

/// Sent by a secondary to the primary during `init`; payload is its pid.
pub const SECONDARY_STARTED: &str = "app-guard.secondary-started";

/// Returns true if `handle` lies in the engine-reserved namespace.
#[must_use]
pub fn is_reserved_message_handle(handle: &str) -> bool {
    handle.starts_with(RESERVED_PREFIX)
}

/// Opaque string identifying an application.
///
/// Immutable once constructed. Only ASCII alphanumerics, `.`, `-` and `_`
/// are accepted, up to [`ApplicationHandle::MAX_LEN`] bytes, so the handle
/// can be embedded in lock and socket paths on every platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationHandle(String);

impl ApplicationHandle {
    /// Maximum handle length in bytes.
    ///
    /// Unix socket paths are limited to ~108 bytes including the runtime
    /// directory, so handles stay well below that.
    pub const MAX_LEN: usize = 64;

    /// Validates and wraps a raw handle.
    pub fn new(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(DomainError::InvalidHandle {
                handle: raw,
                reason: "handle is empty".to_string(),
            });
        }

        if raw.len() > Self::MAX_LEN {
            return Err(DomainError::InvalidHandle {
                reason: format!("handle exceeds {} bytes", Self::MAX_LEN),
                handle: raw,
            });
        }

        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(DomainError::InvalidHandle {
                reason: format!("character {bad:?} is not allowed"),
                handle: raw,
            });
        }

        if raw.starts_with('.') {
            return Err(DomainError::InvalidHandle {
                handle: raw,
                reason: "handle must not start with '.'".to_string(),
            });
        }

        Ok(Self(raw))
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the lock file backing the exclusive claim.
    #[must_use]
    pub fn lock_file_name(&self) -> String {
        format!("{}.lock", self.0)
    }

    /// File name of the socket the primary listens on.
    #[must_use]
    pub fn socket_file_name(&self) -> String {
        format!("{}.sock", self.0)
    }
}

impl fmt::Display for ApplicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ApplicationHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApplicationHandle {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApplicationHandle> for String {
    fn from(handle: ApplicationHandle) -> Self {
        handle.0
    }
}
