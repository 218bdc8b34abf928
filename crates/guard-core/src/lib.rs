//! app-guard core - shared domain types
//!
//! This crate holds the types shared between the wire protocol
//! (`guard-protocol`) and the engine (`app-guard`): application and
//! message handles, instance roles, frames and registration ids.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod frame;
pub mod handle;
pub mod message_id;
pub mod role;

pub use error::{DomainError, DomainResult};
pub use frame::Frame;
pub use handle::{
    is_reserved_message_handle, ApplicationHandle, RESERVED_PREFIX, SECONDARY_STARTED,
};
pub use message_id::MessageId;
pub use role::InstanceRole;
