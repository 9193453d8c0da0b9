//! The scripted variant of a scheduled task: one backed by an IPC proxy to a
//! worker process instead of an in-process `Arc<dyn Task>` (§9 "TaskRef"
//! redesign note — the original keeps one polymorphic task pointer and
//! branches internally on whether it is local or proxied; here that
//! branch is made explicit as [`crate::TaskRef`]'s two variants instead).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ipc_core::Proxy;
use ipc_types::collaborators::Task;
use serde_json::Value;

const METHOD_DO_RUN: u16 = 0;
const METHOD_ON_REQUEST_EXIT: u16 = 1;
const METHOD_NEXT_EXECUTION_DELAY_MS: u16 = 2;

const SCRIPTED_TASK_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`Task`] whose actual work happens in another process, reached through
/// a [`Proxy`]. `Do`/`OnRequestExit`/next-delay all become request/response
/// round trips rather than direct calls.
pub struct ScriptedTask {
    proxy: Proxy,
    name: String,
    description: String,
    label: String,
    cached_delay_ms: AtomicU64,
}

impl ScriptedTask {
    pub fn new(proxy: Proxy, name: impl Into<String>, description: impl Into<String>, label: impl Into<String>) -> Self {
        ScriptedTask { proxy, name: name.into(), description: description.into(), label: label.into(), cached_delay_ms: AtomicU64::new(0) }
    }
}

impl Task for ScriptedTask {
    fn on_request_exit(&self) {
        let _ = self.proxy.send_request(METHOD_ON_REQUEST_EXIT, &[], SCRIPTED_TASK_CALL_TIMEOUT);
    }

    fn do_run(&self, environment: &Value, task_settings: &Value) -> Result<(), String> {
        let payload = serde_json::json!({ "environment": environment, "task_settings": task_settings });
        let bytes = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;
        // `send_request` surfaces IPC-level failure as a `CoreError`, whose
        // `Display` already carries the originating source location — the
        // `Task` trait's `Result<(), String>` contract has no slot for a
        // richer error, so that location rides along in the string instead.
        self.proxy.send_request(METHOD_DO_RUN, &bytes, SCRIPTED_TASK_CALL_TIMEOUT).map_err(|e| e.to_string())?;

        if let Ok(delay) = self.proxy.send_request(METHOD_NEXT_EXECUTION_DELAY_MS, &[], SCRIPTED_TASK_CALL_TIMEOUT) {
            if delay.len() == 8 {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&delay);
                self.cached_delay_ms.store(u64::from_le_bytes(bytes), Ordering::Release);
            }
        }
        Ok(())
    }

    fn next_execution_delay_ms(&self) -> u64 {
        self.cached_delay_ms.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn label(&self) -> &str {
        &self.label
    }
}
