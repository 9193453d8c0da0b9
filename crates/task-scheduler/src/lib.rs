//! Cooperative, time-ordered scheduler for recurring plugin tasks.
//!
//! One binding thread runs at most one [`ipc_types::collaborators::Task`] at
//! a time, in next-run-time order, whether that task is native Rust or a
//! [`scripted::ScriptedTask`] backed by an IPC proxy.

pub mod scheduler;
pub mod scripted;

pub use scheduler::{Scheduler, TaskRef, TaskResult};
pub use scripted::ScriptedTask;
