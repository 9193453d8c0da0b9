//! Wire-level value types shared across the plugin host IPC fabric.
//!
//! This crate has no behavior of its own beyond encode/decode and parsing —
//! the stateful subsystems (session allocation, object tables, transport,
//! run loop, scheduler) live in `ipc-core` and `task-scheduler`.

pub mod collaborators;
pub mod error;
pub mod guid;
pub mod header;
pub mod method;
pub mod object_id;

pub use error::{IpcError, IpcErrorKind};
pub use guid::Guid;
pub use header::{MessageHeader, MessageType};
pub use method::{MethodMetadata, MethodTable};
pub use object_id::ObjectId;
