//! IPC substrate for the out-of-process plugin host.
//!
//! Layering, bottom to top: [`shmem`] and [`transport`] move bytes between
//! two processes; [`session`] and [`object_manager`] track who owns what;
//! [`run_loop`] and [`proxy`] turn byte transport into typed request/response
//! calls; [`connection`] watches liveness over all of it; [`load_plugin`] is
//! the one public entry point an embedder calls to bring a plugin online.

pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod load_plugin;
pub mod object_manager;
pub mod proxy;
pub mod run_loop;
pub mod session;
pub mod shmem;
pub mod transport;

pub use connection::{ConnectionInfo, ConnectionManager};
pub use error::CoreError;
pub use object_manager::{Lookup, ObjectManager};
pub use proxy::{Proxy, Stub};
pub use run_loop::{EventHandler, RequestHandler, RunLoop, MAX_NESTED_CALLS};
pub use session::{global_coordinator, SessionCoordinator};
pub use shmem::{SharedMemoryManager, SharedMemoryPool};
pub use transport::{Envelope, QueueTransport, SMALL_MESSAGE_THRESHOLD};
