//! Reentrancy cap on nested calls (spec §8 scenario S5): a handler that
//! calls back into its own run loop, nested up to 32 deep, succeeds all the
//! way down and unwinds LIFO; the 33rd nesting level is rejected with
//! `Reentrancy` rather than queued indefinitely.
//!
//! The handler re-enters the *same* run loop it is dispatched from, over a
//! transport whose outbound end feeds back into its own inbound end
//! (`QueueTransport::looped`). That makes this a single real nested Rust
//! call stack on one thread — `send_request_and_wait` -> `pump_once` ->
//! dispatch -> handler -> `send_request_and_wait` again — rather than a
//! pile of independent threads racing a depth counter.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use ipc_core::run_loop::{EventHandler, RequestHandler, RunLoop, MAX_NESTED_CALLS};
use ipc_core::transport::QueueTransport;
use ipc_types::header::MessageHeader;
use ipc_types::object_id::ObjectId;
use ipc_types::{IpcError, IpcErrorKind};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn request_for(run_loop: &RunLoop) -> MessageHeader {
    MessageHeader::request(1, 1, run_loop.allocate_call_id(), ObjectId { session_id: 2, generation: 1, local_id: 1 }, 1)
}

/// Builds a run loop whose own handler re-enters it: given a one-byte body
/// `[n]`, `n == 0` returns immediately, otherwise the handler blocks on its
/// own `send_request_and_wait` with body `[n - 1]` before returning. Entry
/// and exit of every nesting level are recorded in `entries`/`exits` so the
/// unwind order can be asserted.
fn self_looping_run_loop(pool_id: &str, entries: Arc<Mutex<Vec<u8>>>, exits: Arc<Mutex<Vec<u8>>>) -> Arc<RunLoop> {
    let self_ref: Arc<OnceLock<Arc<RunLoop>>> = Arc::new(OnceLock::new());
    let handler_self_ref = Arc::clone(&self_ref);

    let request_handler: RequestHandler = Arc::new(move |_header, body| {
        let n = body[0];
        entries.lock().unwrap().push(n);
        if n == 0 {
            exits.lock().unwrap().push(n);
            return Ok(vec![0]);
        }

        let run_loop = handler_self_ref.get().expect("run loop installed before first request is dispatched");
        let header = request_for(run_loop);
        let outcome = run_loop
            .send_request_and_wait(header, &[n - 1], CALL_TIMEOUT)
            .map_err(|core_err| core_err.kind)
            .and_then(|(response_header, response_body)| {
                if response_header.error_code != 0 {
                    Err(IpcError::Reentrancy)
                } else {
                    Ok(response_body)
                }
            });

        exits.lock().unwrap().push(n);
        outcome
    });

    let event_handler: EventHandler = Arc::new(|_header, _body| {});
    let transport = Arc::new(QueueTransport::looped(pool_id));
    let run_loop = Arc::new(RunLoop::new(transport, request_handler, event_handler));
    self_ref.set(Arc::clone(&run_loop)).ok();
    run_loop
}

#[test]
fn nesting_exactly_to_the_limit_succeeds_and_unwinds_lifo() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let exits = Arc::new(Mutex::new(Vec::new()));
    let run_loop = self_looping_run_loop("s5_reentrancy_ok", Arc::clone(&entries), Arc::clone(&exits));

    // MAX_NESTED_CALLS total send_request_and_wait calls get made: the
    // top-level one issued here plus one per handler invocation with n > 0,
    // so starting one below the cap lands the chain exactly on it.
    let initial = (MAX_NESTED_CALLS - 1) as u8;
    let header = request_for(&run_loop);
    let (response_header, response_body) = run_loop.send_request_and_wait(header, &[initial], CALL_TIMEOUT).unwrap();

    assert_eq!(response_header.error_code, 0);
    assert_eq!(response_body, vec![0]);

    let entered = entries.lock().unwrap().clone();
    let exited = exits.lock().unwrap().clone();
    let expected_entries: Vec<u8> = (0..=initial).rev().collect();
    let expected_exits: Vec<u8> = (0..=initial).collect();
    assert_eq!(entered, expected_entries, "each level should be entered from deepest remaining down to zero");
    assert_eq!(exited, expected_exits, "the level entered last (n=0) must exit first, and so on back up the chain");
}

#[test]
fn one_nesting_level_past_the_limit_is_rejected_with_reentrancy() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let exits = Arc::new(Mutex::new(Vec::new()));
    let run_loop = self_looping_run_loop("s5_reentrancy_overflow", entries, exits);

    let initial = MAX_NESTED_CALLS as u8;
    let header = request_for(&run_loop);
    let (response_header, _body) = run_loop.send_request_and_wait(header, &[initial], CALL_TIMEOUT).unwrap();

    assert_eq!(response_header.error_code, IpcErrorKind::Reentrancy.code());
}
