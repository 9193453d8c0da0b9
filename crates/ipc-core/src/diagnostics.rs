//! Logging bootstrap.
//!
//! The original host logs to a file via its own small logging façade; here
//! that's `tracing` + `tracing_subscriber`, following the
//! `tracing_subscriber::fmt().with_env_filter(...)` setup pattern used for
//! the same purpose elsewhere in the retrieval pack. Call once, at process
//! start, before constructing any of the other subsystems in this crate.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading its filter from
/// `IPC_LOG`, defaulting to `info` when unset. Safe to call more than once;
/// subsequent calls are no-ops (`set_global_default` failures are ignored).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("IPC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
