//! Proxy and stub base (spec §4.8).
//!
//! A proxy is the local stand-in for a remote object: it owns one
//! distributed reference (released on `Drop`) and turns method calls into
//! REQUEST/RESPONSE round trips through a [`RunLoop`]. A stub is the
//! receiving side: it looks up a method by id in a [`MethodTable`] and
//! invokes a caller-supplied dispatch closure. Grounded on
//! `das/Core/IPC/include/das/Core/IPC/DasProxyBase.h` and `IStubBase.h`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipc_types::error::IpcError;
use ipc_types::header::MessageHeader;
use ipc_types::method::MethodTable;
use ipc_types::object_id::ObjectId;

use crate::error::CoreError;
use crate::object_manager::ObjectManager;
use crate::run_loop::RunLoop;

/// Local handle to a remote object. Every clone of the underlying
/// `Arc<ProxyState>` shares one distributed reference; the reference is
/// released exactly once, when the last clone drops.
pub struct Proxy {
    state: Arc<ProxyState>,
}

struct ProxyState {
    run_loop: Arc<RunLoop>,
    object_manager: Arc<ObjectManager>,
    interface_id: u32,
    object_id: ObjectId,
    encoded_id: u64,
    /// Count of live `Proxy` handles sharing this state, tracked independently
    /// of `Arc::strong_count`. Two clones dropped concurrently on separate
    /// threads can both observe the same stale `strong_count` before either
    /// decrement lands, so that count can never answer "am I the last
    /// owner" — this counter is decremented-and-checked atomically instead,
    /// the same idiom `Arc` itself uses internally.
    local_refs: AtomicUsize,
}

impl Proxy {
    /// Wrap an already-registered remote object (the object manager must
    /// already hold a reference for `encoded_id`, as `register_remote_object`
    /// leaves it — `IpcLoadPlugin` and friends call that first).
    pub fn new(run_loop: Arc<RunLoop>, object_manager: Arc<ObjectManager>, interface_id: u32, encoded_id: u64) -> Self {
        Proxy {
            state: Arc::new(ProxyState {
                run_loop,
                object_manager,
                interface_id,
                object_id: ObjectId::decode(encoded_id),
                encoded_id,
                local_refs: AtomicUsize::new(1),
            }),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.state.object_id
    }

    /// Call a method by id, blocking for the response. `request_body` is
    /// the already-serialized argument payload; the returned bytes are the
    /// callee's serialized result.
    pub fn send_request(&self, method_id: u16, request_body: &[u8], timeout: Duration) -> Result<Vec<u8>, CoreError> {
        let call_id = self.state.run_loop.allocate_call_id();
        let header =
            MessageHeader::request(self.state.interface_id, method_id, call_id, self.state.object_id, request_body.len() as u32);
        let (response_header, response_body) =
            self.state.run_loop.send_request_and_wait(header, request_body, timeout)?;
        if response_header.error_code != 0 {
            return Err(decode_error_code(response_header.error_code).into());
        }
        Ok(response_body)
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        let _ = self.state.object_manager.add_ref(self.state.encoded_id);
        self.state.local_refs.fetch_add(1, Ordering::AcqRel);
        Proxy { state: Arc::clone(&self.state) }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        // `fetch_sub` returns the pre-decrement count, so `1` here means this
        // drop was the last live handle — the only thread that can ever see
        // that value, since the counter only ever decreases by one per drop.
        if self.state.local_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.state.object_manager.release(self.state.encoded_id);
        }
    }
}

/// Recover the best-effort [`IpcError`] for a wire error code. Codes outside
/// the known reserved range surface as [`IpcError::InvalidArgument`] rather
/// than panicking — a peer running a newer version may send a code this
/// build has never heard of.
fn decode_error_code(code: i32) -> IpcError {
    use ipc_types::error::{IpcErrorKind, IPC_ERROR_BASE};
    let offset = IPC_ERROR_BASE - code - 1;
    let kinds = [
        IpcErrorKind::InvalidMessageHeader,
        IpcErrorKind::Timeout,
        IpcErrorKind::InvalidHandle,
        IpcErrorKind::StaleHandle,
        IpcErrorKind::PeerLost,
        IpcErrorKind::SharedMemoryFailure,
        IpcErrorKind::ConnectionClosed,
        IpcErrorKind::Reentrancy,
        IpcErrorKind::OutOfMemory,
        IpcErrorKind::InvalidState,
        IpcErrorKind::ObjectNotFound,
        IpcErrorKind::InvalidString,
        IpcErrorKind::InvalidStringSize,
        IpcErrorKind::InvalidArgument,
    ];
    match usize::try_from(offset).ok().and_then(|i| kinds.get(i)) {
        Some(IpcErrorKind::InvalidHandle) => IpcError::InvalidHandle,
        Some(IpcErrorKind::StaleHandle) => IpcError::StaleHandle,
        Some(IpcErrorKind::PeerLost) => IpcError::PeerLost,
        Some(IpcErrorKind::ConnectionClosed) => IpcError::ConnectionClosed,
        Some(IpcErrorKind::Reentrancy) => IpcError::Reentrancy,
        Some(IpcErrorKind::OutOfMemory) => IpcError::OutOfMemory,
        Some(IpcErrorKind::ObjectNotFound) => IpcError::ObjectNotFound,
        Some(IpcErrorKind::Timeout) => IpcError::Timeout,
        _ => IpcError::invalid_argument(format!("remote error code {code}")),
    }
}

/// The receiving side of a proxied interface: a method table plus a
/// dispatch closure that applies the looked-up method to the request body.
pub struct Stub {
    methods: MethodTable,
    dispatch: Box<dyn Fn(u16, &[u8]) -> Result<Vec<u8>, IpcError> + Send + Sync>,
}

impl Stub {
    pub fn new(methods: MethodTable, dispatch: impl Fn(u16, &[u8]) -> Result<Vec<u8>, IpcError> + Send + Sync + 'static) -> Self {
        Stub { methods, dispatch: Box::new(dispatch) }
    }

    /// Look up `method_id` and invoke it. Bounds-checked: an unknown id
    /// never reaches the dispatch closure, matching `IStubBase::FindMethod`.
    pub fn handle_request(&self, header: &MessageHeader, body: &[u8]) -> Result<Vec<u8>, IpcError> {
        self.methods
            .find(header.method_id)
            .ok_or_else(|| IpcError::invalid_argument(format!("unknown method id {}", header.method_id)))?;
        (self.dispatch)(header.method_id, body)
    }
}
