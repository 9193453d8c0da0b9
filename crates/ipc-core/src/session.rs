//! Process-wide session id coordination (spec §4.5, §9 "main-process"
//! open question).
//!
//! Grounded on `das/Core/IPC/include/das/Core/IPC/SessionCoordinator.h`:
//! a mutex-guarded bitmap over all 65536 possible ids, an atomic
//! low-watermark hint, and a single atomic "local session id" slot set once
//! at bootstrap — the same shape as `mesh-rt::actor::registry`'s
//! `OnceLock`-backed global singleton, generalized here to carry the
//! allocation bitmap rather than a name table.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use ipc_types::object_id::{SESSION_ID_MAIN, SESSION_ID_RESERVED_HIGH, SESSION_ID_RESERVED_LOW};

const TOTAL_SESSION_IDS: usize = 1 << 16;

/// Process-unique session id allocator. Ids `0` and `0xFFFF` are reserved
/// and never allocatable; id `1` is pre-marked allocated at construction
/// (it denotes the main process) and is handed out only via
/// [`SessionCoordinator::claim_main_session_id`], never by
/// [`SessionCoordinator::allocate_session_id`].
pub struct SessionCoordinator {
    allocated: Mutex<Vec<bool>>,
    next_hint: AtomicU16,
    local_session_id: AtomicU16,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        let mut allocated = vec![false; TOTAL_SESSION_IDS];
        allocated[SESSION_ID_RESERVED_LOW as usize] = true;
        allocated[SESSION_ID_MAIN as usize] = true;
        allocated[SESSION_ID_RESERVED_HIGH as usize] = true;
        SessionCoordinator {
            allocated: Mutex::new(allocated),
            next_hint: AtomicU16::new(2),
            local_session_id: AtomicU16::new(0),
        }
    }

    /// Is `id` one of the never-allocatable sentinel values?
    pub fn is_reserved(id: u16) -> bool {
        id == SESSION_ID_RESERVED_LOW || id == SESSION_ID_MAIN || id == SESSION_ID_RESERVED_HIGH
    }

    /// Allocate the lowest unset, non-reserved session id. Returns `0`
    /// (itself reserved, so unambiguous as a failure sentinel) if the space
    /// is exhausted.
    pub fn allocate_session_id(&self) -> u16 {
        let mut allocated = self.allocated.lock();
        let hint = self.next_hint.load(Ordering::Relaxed);
        // Scan from the hint, then wrap once through the low ids.
        for candidate in (hint..=0xFFFE).chain(2..hint) {
            if !allocated[candidate as usize] {
                allocated[candidate as usize] = true;
                self.next_hint.store(candidate.wrapping_add(1).max(2), Ordering::Relaxed);
                return candidate;
            }
        }
        0
    }

    /// Release a previously allocated id. Idempotent: releasing an already
    /// free (or reserved) id is a no-op.
    pub fn release_session_id(&self, id: u16) {
        if Self::is_reserved(id) {
            return;
        }
        self.allocated.lock()[id as usize] = false;
    }

    pub fn is_session_id_allocated(&self, id: u16) -> bool {
        self.allocated.lock()[id as usize]
    }

    /// This process's own session id, or `0` if not yet set.
    pub fn local_session_id(&self) -> u16 {
        self.local_session_id.load(Ordering::Acquire)
    }

    pub fn set_local_session_id(&self, id: u16) {
        self.local_session_id.store(id, Ordering::Release);
    }

    /// Claim session id `1` (the main process id) for this process. Fails
    /// if it has already been claimed by calling this twice in the same
    /// process lifetime — it is pre-marked allocated at construction, so
    /// unlike `allocate_session_id` this never falls through to the
    /// general pool.
    pub fn claim_main_session_id(&self) -> bool {
        if self.local_session_id.load(Ordering::Acquire) != 0 {
            return false;
        }
        self.local_session_id.store(SESSION_ID_MAIN, Ordering::Release);
        true
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_COORDINATOR: OnceLock<SessionCoordinator> = OnceLock::new();

/// The process-wide session coordinator singleton.
pub fn global_coordinator() -> &'static SessionCoordinator {
    GLOBAL_COORDINATOR.get_or_init(SessionCoordinator::new)
}
