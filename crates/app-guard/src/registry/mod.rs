//! Message registry using the Actor pattern.
//!
//! The registry maps message handles to callbacks. A single actor task
//! owns the map; registration, removal and dispatch are commands sent over
//! an mpsc channel, so a registration racing an in-flight dispatch is
//! serialized without any lock around user callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │    AppGuard     │────▶│  RegistryActor  │
//! │ register/unreg. │     │ BTreeMap<Id,Reg>│
//! └─────────────────┘     └────────▲────────┘
//!                                  │ Dispatch
//!                         ┌────────┴────────┐
//!                         │DispatchListener │
//!                         └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - A panicking callback is caught and counted, not propagated
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{DispatchReport, MessageCallback, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use app_guard::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry();
///     let id = registry
///         .register("open".to_string(), std::sync::Arc::new(|frame: &app_guard::Frame| {
///             println!("open {:?}", frame.payload);
///         }))
///         .await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = RegistryActor::new(cmd_rx);
    tokio::spawn(actor.run());
    RegistryHandle::new(cmd_tx)
}
