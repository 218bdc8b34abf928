//! Error types for the app-guard engine.
//!
//! `GuardError` is what embedders see. Component errors (`ClaimError`,
//! `TransportError`, `RegistryError`) convert into it with `?`.
//! Malformed inbound frames never reach this type: the listener drops
//! them and logs.

use std::path::PathBuf;

use thiserror::Error;

use crate::claim::ClaimError;
use crate::config::ConfigError;
use crate::platform::FocusError;
use crate::registry::RegistryError;
use crate::transport::TransportError;

/// Errors surfaced by [`crate::AppGuard`] operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The operation requires an initialized engine.
    #[error("app-guard is not loaded; call init() first")]
    NotLoaded,

    /// `init` was called twice without an intervening `release`.
    #[error("app-guard is already initialized")]
    AlreadyInitialized,

    /// The exclusive claim could not be acquired, so the role is unknown.
    #[error("Failed to determine instance role: {0}")]
    Claim(#[from] ClaimError),

    /// No primary is listening for this application handle.
    #[error("No primary instance is listening at {}", endpoint.display())]
    ChannelUnavailable { endpoint: PathBuf },

    /// Sending or binding over the local transport failed.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Message handle lies in the engine-reserved namespace.
    #[error("Message handle {0:?} is reserved for internal notifications")]
    ReservedHandle(String),

    /// Message handle is empty.
    #[error("Message handle must not be empty")]
    InvalidMessageHandle,

    /// The registry actor is gone.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Window activation failed in the platform collaborator.
    #[error("Failed to focus window: {0}")]
    Focus(#[from] FocusError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<TransportError> for GuardError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unavailable { endpoint } => GuardError::ChannelUnavailable { endpoint },
            other => GuardError::Transport(other),
        }
    }
}

/// Convenience result alias for engine operations.
pub type Result<T> = std::result::Result<T, GuardError>;
