//! Client interface for interacting with the RegistryActor.
//!
//! Every method maps a closed channel to `RegistryError::ChannelClosed`.

use guard_core::{Frame, MessageId};
use tokio::sync::{mpsc, oneshot};

use super::commands::{DispatchReport, MessageCallback, RegistryCommand, RegistryError};

/// Cheap-to-clone handle to the registry actor.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;
        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Registers `callback` under `handle` and returns its id.
    pub async fn register(
        &self,
        handle: String,
        callback: MessageCallback,
    ) -> Result<MessageId, RegistryError> {
        self.request(|respond_to| RegistryCommand::Register {
            handle,
            callback,
            respond_to,
        })
        .await
    }

    /// Removes the registration with `id`.
    ///
    /// Returns `false` if it was already gone.
    pub async fn unregister(&self, id: MessageId) -> Result<bool, RegistryError> {
        self.request(|respond_to| RegistryCommand::Unregister { id, respond_to })
            .await
    }

    /// Invokes every callback registered under `frame.handle`, in order.
    ///
    /// Resolves after all of them have run.
    pub async fn dispatch(&self, frame: Frame) -> Result<DispatchReport, RegistryError> {
        self.request(|respond_to| RegistryCommand::Dispatch { frame, respond_to })
            .await
    }

    /// Removes every registration.
    pub async fn clear(&self) -> Result<usize, RegistryError> {
        self.request(|respond_to| RegistryCommand::Clear { respond_to })
            .await
    }
}
