//! Location-carrying error wrapper (spec §7, SPEC_FULL.md Ambient stack).
//!
//! `ipc_types::IpcError` stays the closed, wire-transmissible classification
//! (spec §6) — it is what actually travels in a RESPONSE's `error_code`
//! field, so it carries no extra baggage. This module adds the "typed
//! exception carrying the originating source location" half of spec §7 on
//! top of it for the calls this crate hands back to an embedder directly
//! (`RunLoop::send_request_and_wait`/`pump_once`, `Proxy::send_request`,
//! `load_plugin`): a [`CoreError`] pairs an [`IpcError`] classification with
//! the `#[track_caller]`-captured [`Location`] of the call that surfaced it.

use std::panic::Location;

use ipc_types::error::IpcError;

/// An [`IpcError`] plus the source location that raised it.
#[derive(Debug, Clone)]
pub struct CoreError {
    pub kind: IpcError,
    pub location: &'static Location<'static>,
}

impl CoreError {
    #[track_caller]
    pub fn new(kind: IpcError) -> Self {
        CoreError { kind, location: Location::caller() }
    }
}

impl PartialEq for CoreError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
impl Eq for CoreError {}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at {}:{}:{})", self.kind, self.location.file(), self.location.line(), self.location.column())
    }
}

impl std::error::Error for CoreError {}

impl From<IpcError> for CoreError {
    #[track_caller]
    fn from(kind: IpcError) -> Self {
        CoreError::new(kind)
    }
}
