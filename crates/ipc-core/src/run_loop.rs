//! Cooperative run loop (spec §4.7).
//!
//! One run loop owns one [`QueueTransport`] direction and pumps it on a
//! single thread, matching `das/Core/IPC/include/das/Core/IPC/IpcRunLoop.h`:
//! REQUEST dispatches into a caller-supplied handler, RESPONSE resolves a
//! pending call by `call_id`, EVENT fires a fire-and-forget
//! handler, HEARTBEAT is swallowed (the connection manager reads liveness
//! off the transport separately). Nested calls — a request handler that
//! itself blocks on an outgoing call before returning — are supported up to
//! a fixed depth, mirroring the original's reentrancy guard.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use tracing::trace;

use ipc_types::error::IpcError;
use ipc_types::header::{MessageHeader, MessageType};

use crate::error::CoreError;
use crate::transport::QueueTransport;

/// Maximum number of calls that may be waiting on a response at once on a
/// single run loop, including nested ones issued from within a request
/// handler. The 33rd concurrent wait is rejected with
/// [`IpcError::Reentrancy`] (spec §4.7 edge case).
pub const MAX_NESTED_CALLS: usize = 32;

struct PendingCall {
    outcome: Mutex<Option<Result<(MessageHeader, Vec<u8>), IpcError>>>,
    ready: Condvar,
}

/// A REQUEST handler: given the header and body, produces the response body
/// (or an [`IpcError`], translated into an error-code RESPONSE).
pub type RequestHandler = Arc<dyn Fn(&MessageHeader, &[u8]) -> Result<Vec<u8>, IpcError> + Send + Sync>;

/// An EVENT handler: fire-and-forget, no response is sent back.
pub type EventHandler = Arc<dyn Fn(&MessageHeader, &[u8]) + Send + Sync>;

pub struct RunLoop {
    transport: Arc<QueueTransport>,
    next_call_id: AtomicU64,
    pending: Mutex<FxHashMap<u64, Arc<PendingCall>>>,
    depth: AtomicUsize,
    stopped: std::sync::atomic::AtomicBool,
    request_handler: RequestHandler,
    event_handler: EventHandler,
}

impl RunLoop {
    pub fn new(transport: Arc<QueueTransport>, request_handler: RequestHandler, event_handler: EventHandler) -> Self {
        RunLoop {
            transport,
            next_call_id: AtomicU64::new(1),
            pending: Mutex::new(FxHashMap::default()),
            depth: AtomicUsize::new(0),
            stopped: std::sync::atomic::AtomicBool::new(false),
            request_handler,
            event_handler,
        }
    }

    pub fn allocate_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pump exactly one message off the transport and dispatch it. Returns
    /// `Ok(false)` on a timeout (nothing to do), `Ok(true)` if a message was
    /// handled, `Err` on a transport failure other than timeout.
    pub fn pump_once(&self, timeout: Duration) -> Result<bool, CoreError> {
        let (header, body) = match self.transport.receive(timeout) {
            Ok(v) => v,
            Err(IpcError::Timeout) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match header.message_type {
            MessageType::Request => self.dispatch_request(&header, &body),
            MessageType::Response => self.dispatch_response(header, body),
            MessageType::Event => (self.event_handler)(&header, &body),
            MessageType::Heartbeat => {}
        }
        Ok(true)
    }

    fn dispatch_request(&self, header: &MessageHeader, body: &[u8]) {
        trace!(call_id = header.call_id, method_id = header.method_id, "dispatching request");
        let result = (self.request_handler)(header, body);
        let (error_code, response_body) = match result {
            Ok(body) => (0, body),
            Err(e) => (e.code(), Vec::new()),
        };
        let response_header = MessageHeader::response(header, error_code, response_body.len() as u32);
        let _ = self.transport.send(response_header, &response_body);
    }

    fn dispatch_response(&self, header: MessageHeader, body: Vec<u8>) {
        let pending = self.pending.lock().remove(&header.call_id);
        if let Some(pending) = pending {
            *pending.outcome.lock() = Some(Ok((header, body)));
            pending.ready.notify_all();
        }
        // A response with no matching pending call is dropped silently: the
        // caller may already have timed out and stopped waiting.
    }

    /// Fail every call still waiting on a response with `error`, used by a
    /// connection manager that has declared the peer lost (spec §4.9): each
    /// waiter's `send_request_and_wait` wakes immediately with a clone of
    /// `error` instead of hanging until its own timeout.
    pub fn fail_all_pending(&self, error: IpcError) {
        let mut pending = self.pending.lock();
        for (_, call) in pending.drain() {
            *call.outcome.lock() = Some(Err(error.clone()));
            call.ready.notify_all();
        }
    }

    /// Issue a request and block the calling thread until its response
    /// arrives, pumping the transport itself in the meantime (so a single
    /// binding thread can both serve incoming requests and wait on outgoing
    /// ones — the "nested call" shape). Fails with [`IpcError::Reentrancy`]
    /// past [`MAX_NESTED_CALLS`] concurrent waits.
    pub fn send_request_and_wait(
        &self,
        header: MessageHeader,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(MessageHeader, Vec<u8>), CoreError> {
        if self.depth.fetch_add(1, Ordering::AcqRel) >= MAX_NESTED_CALLS {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(IpcError::Reentrancy.into());
        }
        let guard = scopeguard(&self.depth);

        let call = Arc::new(PendingCall { outcome: Mutex::new(None), ready: Condvar::new() });
        self.pending.lock().insert(header.call_id, Arc::clone(&call));
        self.transport.send(header.clone(), body)?;

        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                self.pending.lock().remove(&header.call_id);
                drop(guard);
                return Err(IpcError::InvalidState { detail: Some("run loop stopped".into()) }.into());
            }
            let mut slot = call.outcome.lock();
            if slot.is_some() {
                drop(guard);
                return slot.take().unwrap().map_err(CoreError::from);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                self.pending.lock().remove(&header.call_id);
                drop(guard);
                return Err(IpcError::Timeout.into());
            }
            let small_step = remaining.min(Duration::from_millis(5));
            call.ready.wait_for(&mut slot, small_step);
            drop(slot);
            // Between condvar waits, pump any message that has arrived so
            // this thread can satisfy its own nested call without a
            // separate pump thread.
            let _ = self.pump_once(Duration::ZERO);
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut pending = self.pending.lock();
        for (_, call) in pending.drain() {
            call.ready.notify_all();
        }
    }
}

struct DepthGuard<'a>(&'a AtomicUsize);
impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
fn scopeguard(depth: &AtomicUsize) -> DepthGuard<'_> {
    DepthGuard(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_types::object_id::ObjectId;

    fn echo_handler() -> RequestHandler {
        Arc::new(|_header, body| Ok(body.to_vec()))
    }

    fn noop_event_handler() -> EventHandler {
        Arc::new(|_header, _body| {})
    }

    #[test]
    fn request_response_round_trips_through_the_peer_run_loop() {
        let (transport_a, transport_b) = crate::transport::QueueTransport::pair("test_run_loop_echo");
        let transport_a = Arc::new(transport_a);
        let transport_b = Arc::new(transport_b);

        let loop_b = Arc::new(RunLoop::new(Arc::clone(&transport_b), echo_handler(), noop_event_handler()));
        let pump_thread = {
            let loop_b = Arc::clone(&loop_b);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    if loop_b.pump_once(Duration::from_millis(200)).unwrap() {
                        break;
                    }
                }
            })
        };

        let loop_a = RunLoop::new(transport_a, echo_handler(), noop_event_handler());
        let call_id = loop_a.allocate_call_id();
        let header = MessageHeader::request(1, 1, call_id, ObjectId { session_id: 2, generation: 1, local_id: 1 }, 5);
        let (response_header, response_body) =
            loop_a.send_request_and_wait(header, b"hello", Duration::from_secs(2)).unwrap();
        assert_eq!(response_header.error_code, 0);
        assert_eq!(response_body, b"hello");

        pump_thread.join().unwrap();
    }

    #[test]
    fn send_request_and_wait_times_out_with_no_peer() {
        let (transport_a, _transport_b) = crate::transport::QueueTransport::pair("test_run_loop_timeout");
        let loop_a = RunLoop::new(Arc::new(transport_a), echo_handler(), noop_event_handler());
        let call_id = loop_a.allocate_call_id();
        let header = MessageHeader::request(1, 1, call_id, ObjectId { session_id: 2, generation: 1, local_id: 1 }, 1);
        let err = loop_a.send_request_and_wait(header, b"x", Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.kind, IpcError::Timeout);
    }

    #[test]
    fn deeper_than_max_nested_calls_is_rejected() {
        let (transport_a, _transport_b) = crate::transport::QueueTransport::pair("test_run_loop_reentrancy");
        let run_loop = Arc::new(RunLoop::new(Arc::new(transport_a), echo_handler(), noop_event_handler()));
        run_loop.depth.store(MAX_NESTED_CALLS, Ordering::Release);
        let call_id = run_loop.allocate_call_id();
        let header = MessageHeader::request(1, 1, call_id, ObjectId { session_id: 2, generation: 1, local_id: 1 }, 1);
        let err = run_loop.send_request_and_wait(header, b"x", Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind, IpcError::Reentrancy);
    }

    #[test]
    fn stop_wakes_up_waiters_with_invalid_state() {
        let (transport_a, _transport_b) = crate::transport::QueueTransport::pair("test_run_loop_stop");
        let run_loop = Arc::new(RunLoop::new(Arc::new(transport_a), echo_handler(), noop_event_handler()));
        let run_loop_for_stopper = Arc::clone(&run_loop);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            run_loop_for_stopper.stop();
        });
        let call_id = run_loop.allocate_call_id();
        let header = MessageHeader::request(1, 1, call_id, ObjectId { session_id: 2, generation: 1, local_id: 1 }, 1);
        let err = run_loop.send_request_and_wait(header, b"x", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err.kind, IpcError::InvalidState { .. }));
        stopper.join().unwrap();
    }
}
