//! Registry actor commands, errors, and reports.

use std::fmt;
use std::sync::Arc;

use guard_core::{Frame, MessageId};
use thiserror::Error;
use tokio::sync::oneshot;

/// Callback invoked with each frame routed to its handle.
///
/// Callbacks run on the registry's background task, never on the
/// embedder's main thread, and must not block: a slow callback stalls
/// every frame queued behind it.
pub type MessageCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Commands sent to the registry actor.
pub enum RegistryCommand {
    /// Add a registration; replies with its new id.
    Register {
        handle: String,
        callback: MessageCallback,
        respond_to: oneshot::Sender<MessageId>,
    },

    /// Remove one registration; replies whether it existed.
    Unregister {
        id: MessageId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Invoke every callback registered under the frame's handle.
    Dispatch {
        frame: Frame,
        respond_to: oneshot::Sender<DispatchReport>,
    },

    /// Drop every registration; replies with how many were removed.
    Clear { respond_to: oneshot::Sender<usize> },
}

impl fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register { handle, .. } => f.debug_struct("Register").field("handle", handle).finish(),
            Self::Unregister { id, .. } => f.debug_struct("Unregister").field("id", id).finish(),
            Self::Dispatch { frame, .. } => f.debug_struct("Dispatch").field("handle", &frame.handle).finish(),
            Self::Clear { .. } => f.write_str("Clear"),
        }
    }
}

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that ran to completion
    pub invoked: usize,
    /// Callbacks that panicked
    pub failed: usize,
}

impl DispatchReport {
    /// True when no registration matched the handle.
    pub fn is_unrouted(&self) -> bool {
        self.invoked == 0 && self.failed == 0
    }
}

/// Errors that can occur talking to the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The actor has stopped.
    #[error("Registry channel closed")]
    ChannelClosed,
}
