//! Plugin load entry point (spec §6 external "process launcher" boundary;
//! SPEC_FULL.md supplemented feature #1).
//!
//! Grounded on `das/Core/IPC/src/IpcLoadPlugin.cpp`: given a connection
//! already established to a worker process, ask its run loop to instantiate
//! a named plugin module and hand back a local [`Proxy`] holding one
//! reference to the resulting remote object. Spawning the worker process
//! itself is out of scope here (spec §6: an external collaborator) — this
//! function always takes an already-connected [`RunLoop`].

use std::sync::Arc;
use std::time::Duration;

use ipc_types::error::IpcError;
use ipc_types::object_id::ObjectId;

use crate::error::CoreError;
use crate::object_manager::ObjectManager;
use crate::proxy::Proxy;
use crate::run_loop::RunLoop;

/// Well-known interface id for the bootstrap "plugin loader" interface every
/// worker process exposes on object id `ObjectId { local_id: 1, .. }` of its
/// own session. Not a real spec constant — a fixed convention internal to
/// this crate, since the wire-level interface registry itself is an
/// external collaborator (spec §6).
pub const PLUGIN_LOADER_INTERFACE_ID: u32 = 0x504C_4144; // "PLAD"
const METHOD_LOAD_PLUGIN: u16 = 0;

/// Bring a plugin online over an existing connection: call `LoadPlugin` on
/// the peer's bootstrap loader object, then wrap the returned encoded
/// object id in a [`Proxy`] with one held reference.
pub fn load_plugin(
    run_loop: Arc<RunLoop>,
    object_manager: Arc<ObjectManager>,
    loader_session_id: u16,
    plugin_name: &str,
    timeout: Duration,
) -> Result<Proxy, CoreError> {
    let loader_object_id = ObjectId { session_id: loader_session_id, generation: 1, local_id: 1 };
    let call_id = run_loop.allocate_call_id();
    let header = ipc_types::header::MessageHeader::request(
        PLUGIN_LOADER_INTERFACE_ID,
        METHOD_LOAD_PLUGIN,
        call_id,
        loader_object_id,
        plugin_name.len() as u32,
    );
    let (response_header, response_body) =
        run_loop.send_request_and_wait(header, plugin_name.as_bytes(), timeout)?;
    if response_header.error_code != 0 {
        return Err(IpcError::invalid_state(format!("LoadPlugin failed with error code {}", response_header.error_code)).into());
    }
    if response_body.len() != 8 {
        return Err(IpcError::invalid_message_header("LoadPlugin response body must be an 8-byte object id").into());
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&response_body);
    let encoded_id = u64::from_le_bytes(bytes);

    object_manager.register_remote_object(encoded_id)?;
    Ok(Proxy::new(run_loop, object_manager, PLUGIN_LOADER_INTERFACE_ID, encoded_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QueueTransport;
    use std::time::Duration as StdDuration;

    #[test]
    fn load_plugin_wraps_the_peers_response_object_id_in_a_proxy() {
        let object_manager_a = Arc::new(ObjectManager::new(2));
        let object_manager_b = Arc::new(ObjectManager::new(5));
        let remote_object_id = ObjectId { session_id: 5, generation: 1, local_id: 42 }.encode();

        let (transport_a, transport_b) = QueueTransport::pair("test_load_plugin");
        let run_loop_a = Arc::new(RunLoop::new(
            Arc::new(transport_a),
            Arc::new(|_h: &ipc_types::header::MessageHeader, _b: &[u8]| Ok(Vec::new())),
            Arc::new(|_h: &ipc_types::header::MessageHeader, _b: &[u8]| {}),
        ));
        let run_loop_b = Arc::new(RunLoop::new(
            Arc::new(transport_b),
            Arc::new(move |_h: &ipc_types::header::MessageHeader, _b: &[u8]| Ok(remote_object_id.to_le_bytes().to_vec())),
            Arc::new(|_h: &ipc_types::header::MessageHeader, _b: &[u8]| {}),
        ));

        let pump_thread = std::thread::spawn(move || {
            for _ in 0..10 {
                if run_loop_b.pump_once(StdDuration::from_millis(200)).unwrap() {
                    break;
                }
            }
        });

        let proxy =
            load_plugin(Arc::clone(&run_loop_a), Arc::clone(&object_manager_a), 5, "example-plugin", StdDuration::from_secs(2))
                .unwrap();
        assert_eq!(proxy.object_id().encode(), remote_object_id);
        assert!(object_manager_a.is_valid_object(remote_object_id));

        drop(proxy);
        pump_thread.join().unwrap();
        let _ = object_manager_b; // retained only to keep the peer's scope symmetric in this test
    }
}
