//! Distributed object manager (spec §3 `ObjectHandle`, §4.6).
//!
//! Maps an encoded [`ObjectId`] to either a locally-owned object or a
//! non-owning remote cache entry, with distributed reference counting and
//! generation-based stale-handle rejection. Structurally this mirrors
//! `mesh-rt::dist::global::GlobalRegistry`: one lock guarding a small set of
//! maps that must stay mutually consistent, plus a reverse index for O(1)
//! cleanup — generalized here from "names" to "local object slots".

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use ipc_types::error::IpcError;
use ipc_types::object_id::{increment_generation, ObjectId};

struct Slot {
    generation: u16,
    refcount: u32,
    /// `Some` for locally-owned objects; `None` for non-owning remote cache
    /// entries (spec: "remote handles are cache entries").
    local: Option<Arc<dyn Any + Send + Sync>>,
}

impl Slot {
    fn is_local(&self) -> bool {
        self.local.is_some()
    }
}

struct Inner {
    slots: FxHashMap<u32, Slot>,
    /// Last-used generation per `local_id`, kept even after the slot itself
    /// is removed so a later reuse of the same `local_id` bumps forward
    /// instead of restarting at 1 (which would let a stale handle from the
    /// previous occupant pass validation again).
    generations: FxHashMap<u32, u16>,
    /// Freed local ids available for reuse, populated by `release` when a
    /// locally-owned object's refcount reaches zero.
    free_ids: Vec<u32>,
    next_local_id: u32,
}

/// What a successful [`ObjectManager::lookup_object`] found.
pub enum Lookup {
    /// A locally-owned object, for in-process dispatch without going
    /// through a proxy.
    Local(Arc<dyn Any + Send + Sync>),
    /// A remote object: callers must route through a proxy instead.
    Remote,
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Local(_) => f.debug_tuple("Local").finish(),
            Lookup::Remote => write!(f, "Remote"),
        }
    }
}

/// Per-session object table. `session_id` is this process's own session,
/// used when minting new local object ids.
pub struct ObjectManager {
    session_id: u16,
    inner: RwLock<Inner>,
}

impl ObjectManager {
    pub fn new(session_id: u16) -> Self {
        ObjectManager {
            session_id,
            inner: RwLock::new(Inner {
                slots: FxHashMap::default(),
                generations: FxHashMap::default(),
                free_ids: Vec::new(),
                next_local_id: 1,
            }),
        }
    }

    /// Register a newly created local object, returning its encoded id.
    /// Reuses a freed `local_id` if one is available (bumping its
    /// generation forward so a handle to the previous occupant is rejected
    /// as stale rather than colliding with the new object), otherwise mints
    /// a fresh one. Starts the refcount at 1.
    pub fn register_local_object(&self, object: Arc<dyn Any + Send + Sync>) -> u64 {
        let mut inner = self.inner.write();
        let local_id = inner.free_ids.pop().unwrap_or_else(|| {
            let id = inner.next_local_id;
            inner.next_local_id = inner.next_local_id.wrapping_add(1).max(1);
            id
        });
        let generation = inner.generations.get(&local_id).map(|g| increment_generation(*g)).unwrap_or(1);
        inner.generations.insert(local_id, generation);
        inner.slots.insert(local_id, Slot { generation, refcount: 1, local: Some(object) });
        ObjectId { session_id: self.session_id, generation, local_id }.encode()
    }

    /// Register a non-owning cache entry for an object this process does
    /// not own. Subsequent [`Self::lookup_object`] calls on `encoded_id`
    /// return [`Lookup::Remote`] so callers route through a proxy.
    pub fn register_remote_object(&self, encoded_id: u64) -> Result<(), IpcError> {
        let id = ObjectId::decode(encoded_id);
        let mut inner = self.inner.write();
        inner
            .slots
            .entry(id.local_id)
            .and_modify(|slot| slot.refcount += 1)
            .or_insert(Slot { generation: id.generation, refcount: 1, local: None });
        Ok(())
    }

    /// Validate that `encoded_id` names a currently-live slot with a
    /// matching generation. The common gate every other operation here
    /// runs through first.
    fn validate(inner: &Inner, encoded_id: u64) -> Result<(u32, u16), IpcError> {
        let id = ObjectId::decode(encoded_id);
        let slot = inner.slots.get(&id.local_id).ok_or(IpcError::InvalidHandle)?;
        if !id.is_valid_for_generation(slot.generation) {
            return Err(IpcError::StaleHandle);
        }
        Ok((id.local_id, slot.generation))
    }

    pub fn validate_object_id(&self, encoded_id: u64) -> Result<(), IpcError> {
        let inner = self.inner.read();
        Self::validate(&inner, encoded_id).map(|_| ())
    }

    /// Increment the distributed refcount. Returns the new count.
    pub fn add_ref(&self, encoded_id: u64) -> Result<u32, IpcError> {
        let mut inner = self.inner.write();
        let (local_id, _) = Self::validate(&inner, encoded_id)?;
        let slot = inner.slots.get_mut(&local_id).expect("validated above");
        slot.refcount += 1;
        Ok(slot.refcount)
    }

    /// Decrement the distributed refcount. At zero, the slot is removed
    /// from the index. A locally-owned id's `local_id` is returned to the
    /// free list for reuse — its generation stays recorded in `generations`
    /// so the next occupant starts one past it, and a lookup against the
    /// old encoded id resolves to `StaleHandle` rather than `InvalidHandle`.
    /// Remote cache entries are not recycled into this process's own
    /// `local_id` pool, since that id belongs to the peer's namespace.
    pub fn release(&self, encoded_id: u64) -> Result<u32, IpcError> {
        let mut inner = self.inner.write();
        let (local_id, _) = Self::validate(&inner, encoded_id)?;
        let slot = inner.slots.get_mut(&local_id).expect("validated above");
        slot.refcount -= 1;
        if slot.refcount == 0 {
            let was_local = slot.is_local();
            inner.slots.remove(&local_id);
            if was_local {
                inner.free_ids.push(local_id);
            }
            Ok(0)
        } else {
            Ok(slot.refcount)
        }
    }

    /// Remove an object outright regardless of refcount (administrative
    /// teardown, e.g. connection loss cleanup in C9).
    pub fn unregister_object(&self, encoded_id: u64) -> Result<(), IpcError> {
        let mut inner = self.inner.write();
        let (local_id, _) = Self::validate(&inner, encoded_id)?;
        let was_local = inner.slots.remove(&local_id).is_some_and(|slot| slot.is_local());
        if was_local {
            inner.free_ids.push(local_id);
        }
        Ok(())
    }

    /// Look up a local object by encoded id. Rejects with
    /// [`IpcError::InvalidHandle`] if the slot is unused, or
    /// [`IpcError::StaleHandle`] if the generation does not match.
    pub fn lookup_object(&self, encoded_id: u64) -> Result<Lookup, IpcError> {
        let inner = self.inner.read();
        let (local_id, _) = Self::validate(&inner, encoded_id)?;
        let slot = inner.slots.get(&local_id).expect("validated above");
        Ok(match &slot.local {
            Some(obj) => Lookup::Local(Arc::clone(obj)),
            None => Lookup::Remote,
        })
    }

    pub fn is_valid_object(&self, encoded_id: u64) -> bool {
        self.validate_object_id(encoded_id).is_ok()
    }

    pub fn is_local_object(&self, encoded_id: u64) -> bool {
        let inner = self.inner.read();
        match Self::validate(&inner, encoded_id) {
            Ok((local_id, _)) => inner.slots.get(&local_id).is_some_and(Slot::is_local),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_local_then_lookup_returns_the_object() {
        let mgr = ObjectManager::new(2);
        let encoded = mgr.register_local_object(Arc::new(42i32));
        match mgr.lookup_object(encoded).unwrap() {
            Lookup::Local(obj) => assert_eq!(*obj.downcast_ref::<i32>().unwrap(), 42),
            Lookup::Remote => panic!("expected local"),
        }
    }

    #[test]
    fn register_remote_then_lookup_returns_remote_marker() {
        let mgr = ObjectManager::new(2);
        let id = ObjectId { session_id: 5, generation: 1, local_id: 7 }.encode();
        mgr.register_remote_object(id).unwrap();
        match mgr.lookup_object(id).unwrap() {
            Lookup::Remote => {}
            Lookup::Local(_) => panic!("expected remote"),
        }
        assert!(!mgr.is_local_object(id));
    }

    #[test]
    fn stale_handle_after_slot_reused_with_new_generation() {
        let mgr = ObjectManager::new(2);
        let id_a = mgr.register_local_object(Arc::new(1i32));
        assert_eq!(mgr.release(id_a).unwrap(), 0);

        // Next registration reuses local_id=1 with a bumped generation.
        let id_b = mgr.register_local_object(Arc::new(2i32));
        assert_ne!(id_a, id_b);

        let err = mgr.lookup_object(id_a).unwrap_err();
        assert_eq!(err, IpcError::StaleHandle);

        match mgr.lookup_object(id_b).unwrap() {
            Lookup::Local(obj) => assert_eq!(*obj.downcast_ref::<i32>().unwrap(), 2),
            Lookup::Remote => panic!("expected local"),
        }
    }

    #[test]
    fn lookup_unused_slot_is_invalid_handle() {
        let mgr = ObjectManager::new(2);
        let never_registered = ObjectId { session_id: 2, generation: 1, local_id: 999 }.encode();
        let err = mgr.lookup_object(never_registered).unwrap_err();
        assert_eq!(err, IpcError::InvalidHandle);
    }

    #[test]
    fn add_ref_then_release_tracks_distributed_count() {
        let mgr = ObjectManager::new(2);
        let id = mgr.register_local_object(Arc::new(1i32));
        assert_eq!(mgr.add_ref(id).unwrap(), 2);
        assert_eq!(mgr.release(id).unwrap(), 1);
        assert_eq!(mgr.release(id).unwrap(), 0);
        assert!(mgr.lookup_object(id).is_err());
    }

    #[test]
    fn generation_rollover_from_0xffff_never_produces_zero() {
        assert_eq!(increment_generation(0xFFFF), 1);
    }
}
