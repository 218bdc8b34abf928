//! app-guard - single-instance arbitration and local message bus
//!
//! The first process to initialize a given application handle becomes the
//! primary instance. Later copies become secondaries and can forward
//! messages to the primary before exiting.
//!
//! - `claim` - exclusive OS lock deciding the instance role
//! - `transport` - Unix socket channel carrying one frame per connection
//! - `registry` - message registry actor mapping handles to callbacks
//! - `listener` - primary-side accept loop dispatching inbound frames
//! - `controller` - [`AppGuard`], the lifecycle owner and public API
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        primary process                        │
//! │                                                               │
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │ ExclusiveClaim  │  │ DispatchListener │─▶│RegistryActor │  │
//! │  │  <handle>.lock  │  │  <handle>.sock   │  │  callbacks   │  │
//! │  └─────────────────┘  └────────▲─────────┘  └──────────────┘  │
//! │                                │ broadcast::Sender<Frame>     │
//! └────────────────────────────────┼──────────────────────────────┘
//!                                  │ one frame per connection
//! ┌────────────────────────────────┴──────────────────────────────┐
//! │           secondary process: send_msg_request()               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Panics inside user callbacks are caught by the registry

#[cfg(not(unix))]
compile_error!("app-guard currently supports Unix platforms only");

pub mod claim;
pub mod config;
pub mod controller;
pub mod error;
pub mod listener;
pub mod platform;
pub mod registry;
pub mod transport;

pub use config::GuardConfig;
pub use controller::AppGuard;
pub use error::{GuardError, Result};
pub use guard_core::{ApplicationHandle, Frame, InstanceRole, MessageId};
pub use listener::ListenerState;
pub use platform::{
    is_process_alive, CommandFocuser, FocusError, NoopFocuser, Platform, ProcessIdentity,
    SystemProcessIdentity, WindowFocuser,
};
