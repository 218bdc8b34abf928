//! Registry actor owning the handle → callback map.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use guard_core::{Frame, MessageId};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::commands::{DispatchReport, MessageCallback, RegistryCommand};

struct Registration {
    handle: String,
    callback: MessageCallback,
}

/// Owner of all registrations.
///
/// Keyed by id in a `BTreeMap`; ids are monotonic, so iteration order is
/// registration order, which is the order callbacks fire in.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    registrations: BTreeMap<MessageId, Registration>,
    next_id: MessageId,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            registrations: BTreeMap::new(),
            next_id: MessageId::FIRST,
        }
    }

    /// Processes commands until every sender is dropped.
    pub async fn run(mut self) {
        debug!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            remaining = self.registrations.len(),
            "Registry actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                handle,
                callback,
                respond_to,
            } => {
                let id = self.handle_register(handle, callback);
                // Ignore send error - caller may have given up waiting
                let _ = respond_to.send(id);
            }
            RegistryCommand::Unregister { id, respond_to } => {
                let removed = self.registrations.remove(&id).is_some();
                debug!(id = %id, removed, "Unregister");
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Dispatch { frame, respond_to } => {
                let report = self.handle_dispatch(&frame);
                let _ = respond_to.send(report);
            }
            RegistryCommand::Clear { respond_to } => {
                let removed = self.registrations.len();
                self.registrations.clear();
                debug!(removed, "Registry cleared");
                let _ = respond_to.send(removed);
            }
        }
    }

    fn handle_register(&mut self, handle: String, callback: MessageCallback) -> MessageId {
        let id = self.next_id;
        self.next_id = id.next();
        debug!(id = %id, handle = %handle, "Registered message callback");
        self.registrations.insert(id, Registration { handle, callback });
        id
    }

    fn handle_dispatch(&self, frame: &Frame) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (id, registration) in &self.registrations {
            if registration.handle != frame.handle {
                continue;
            }

            let callback = &registration.callback;
            match catch_unwind(AssertUnwindSafe(|| callback(frame))) {
                Ok(()) => report.invoked += 1,
                Err(_) => {
                    report.failed += 1;
                    error!(id = %id, handle = %frame.handle, "Message callback panicked");
                }
            }
        }

        if report.is_unrouted() {
            debug!(handle = %frame.handle, "No callback registered for frame");
        }
        report
    }
}
