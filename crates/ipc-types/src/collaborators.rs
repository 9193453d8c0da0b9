//! Trait contracts for collaborators the core consumes but never implements
//! (spec §6). Plugin business logic, settings persistence, localization, the
//! HTTP/CLI gateway, and language-specific bridges all live behind these
//! traits; this crate only describes the shape the core depends on.

use serde_json::Value;

use crate::error::IpcError;
use crate::guid::Guid;

/// Reference-counted, feature-queryable base every IPC-visible object
/// implements (the original `IBase`/`IDasBase`). `AddRef`/`Release` return
/// the *resulting* count, matching the original ABI so a double
/// `AddRef`/`Release` mistake is visible to the caller.
pub trait Base {
    fn add_ref(&self) -> u32;
    fn release(&self) -> u32;

    /// Query for another interface this object implements, identified by
    /// GUID. `Err(ObjectNotFound)` if the object does not implement it.
    fn query_interface(&self, iid: &Guid) -> Result<(), IpcError>;
}

/// Static type identity for an IPC-visible object (the original `ITypeInfo`).
pub trait TypeInfo {
    fn type_guid(&self) -> Guid;
    fn runtime_class_name(&self) -> &str;
}

/// A scheduled unit of recurring plugin work (spec §4.10, §6). Implementors
/// may be native Rust objects or IPC proxies to a scripted task living in a
/// worker process — see `task_scheduler::TaskRef`. Requires `Sync` as well as
/// `Send` because a scheduled task is held behind an `Arc` shared between the
/// binding thread running `do_run` and any other thread calling
/// `delete_task`/`on_request_exit` concurrently.
pub trait Task: Send + Sync {
    /// Advisory cooperative-cancellation request. The task is not forced to
    /// stop; it may finish naturally (spec §4.10 failure policy).
    fn on_request_exit(&self);

    /// Run one invocation. `environment` is the process-wide config blob
    /// from the most recent `UpdateConfig`; `task_settings` is this task's
    /// own settings. Returns `Ok(())` on success or an application-defined
    /// failure message — `Do`'s own failure is a plugin-domain outcome
    /// (spec §7), not an `IpcError`.
    fn do_run(&self, environment: &Value, task_settings: &Value) -> Result<(), String>;

    /// Monotonic offset (milliseconds from now) until this task's next run.
    fn next_execution_delay_ms(&self) -> u64;

    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn label(&self) -> &str;
}

/// A loaded plugin module (the original `IPlugin`).
pub trait Plugin {
    fn enum_feature(&self, index: u32) -> Option<Guid>;
    fn create_feature_interface(&self, index: u32) -> Result<(), IpcError>;
    fn can_unload_now(&self) -> bool;
}

/// Immutable UTF-8 string container exposed by external collaborators
/// (settings, localization). The core treats this opaquely — it never
/// interprets the contents, only passes it across the ABI boundary.
pub trait ReadOnlyString {
    fn as_str(&self) -> &str;
}
