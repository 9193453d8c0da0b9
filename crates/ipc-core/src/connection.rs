//! Connection manager (spec §4.9).
//!
//! Tracks liveness of each peer via periodic HEARTBEAT messages, grounded on
//! `das/Core/IPC/include/das/Core/IPC/ConnectionManager.h`'s constants (1s
//! heartbeat interval, 5s timeout) and `ConnectionInfo` shape. On timeout the
//! connection is marked dead, its shared-memory pool is torn down, and any
//! run-loop calls still waiting on it are failed with
//! [`IpcError::PeerLost`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use tracing::{info, warn};

use ipc_types::error::IpcError;

use crate::run_loop::RunLoop;
use crate::shmem::{SharedMemoryManager, STALE_BLOCK_TTL};

/// How often this process sends a HEARTBEAT to each live peer, and the
/// cadence of the background sweep thread spawned in [`ConnectionManager::new`].
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
/// How long without a heartbeat before a peer is declared lost.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Granularity of the heartbeat thread's sleep loop, so `stop()` can join it
/// quickly regardless of how long `HEARTBEAT_INTERVAL` is configured to be.
const SWEEP_POLL_STEP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub host_id: String,
    pub plugin_id: String,
    pub is_alive: bool,
    pub last_heartbeat_ms: u64,
}

struct Tracked {
    info: RwLock<ConnectionInfo>,
    last_seen: AtomicU64,
    run_loop: Arc<RunLoop>,
}

fn now_ms(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

/// Registry of live peer connections and their heartbeat state. Spawns a
/// background thread on construction that periodically sweeps timeouts and,
/// on peer loss, tears down the connection's shared-memory pool and fails
/// any run-loop calls still waiting on it with [`IpcError::PeerLost`] (spec
/// §4.9).
pub struct ConnectionManager {
    epoch: Instant,
    connections: RwLock<FxHashMap<String, Arc<Tracked>>>,
    stopped: AtomicBool,
    interval: Duration,
    timeout: Duration,
    shmem: Arc<SharedMemoryManager>,
    heartbeat_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(shmem: Arc<SharedMemoryManager>) -> Arc<Self> {
        Self::with_timing(shmem, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT)
    }

    /// Build a manager with non-default sweep timing, so callers (tests
    /// among them) aren't bound to waiting out the real 1s/5s windows.
    pub fn with_timing(shmem: Arc<SharedMemoryManager>, interval: Duration, timeout: Duration) -> Arc<Self> {
        let manager = Arc::new(ConnectionManager {
            epoch: Instant::now(),
            connections: RwLock::new(FxHashMap::default()),
            stopped: AtomicBool::new(false),
            interval,
            timeout,
            shmem,
            heartbeat_thread: Mutex::new(None),
        });
        manager.spawn_heartbeat_thread();
        manager
    }

    fn spawn_heartbeat_thread(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            while !manager.stopped.load(Ordering::Acquire) {
                std::thread::sleep(SWEEP_POLL_STEP);
                elapsed += SWEEP_POLL_STEP;
                if elapsed >= manager.interval {
                    elapsed = Duration::ZERO;
                    manager.sweep_and_reap();
                }
            }
        });
        *self.heartbeat_thread.lock() = Some(handle);
    }

    /// One heartbeat cycle: sweep timeouts, reap anything newly dead, and
    /// run `CleanupStaleBlocks` across every live connection's pool.
    fn sweep_and_reap(&self) {
        for connection_id in self.sweep_timeouts() {
            self.reap_connection(&connection_id);
        }
        self.shmem.cleanup_stale_blocks(STALE_BLOCK_TTL);
    }

    /// Tear down everything a lost peer owned: fail its run loop's pending
    /// calls with [`IpcError::PeerLost`], drop its shared-memory pool, and
    /// drop its tracking entry.
    fn reap_connection(&self, connection_id: &str) {
        let tracked = self.connections.write().remove(connection_id);
        if let Some(tracked) = tracked {
            warn!(%connection_id, "reaping lost connection");
            tracked.run_loop.fail_all_pending(peer_lost_error());
        }
        self.shmem.drop_pool(connection_id);
    }

    pub fn register(&self, connection_id: impl Into<String>, host_id: impl Into<String>, plugin_id: impl Into<String>, run_loop: Arc<RunLoop>) {
        let connection_id = connection_id.into();
        let tracked = Arc::new(Tracked {
            info: RwLock::new(ConnectionInfo { host_id: host_id.into(), plugin_id: plugin_id.into(), is_alive: true, last_heartbeat_ms: 0 }),
            last_seen: AtomicU64::new(now_ms(self.epoch)),
            run_loop,
        });
        info!(%connection_id, "connection registered");
        self.connections.write().insert(connection_id, tracked);
    }

    /// Record that a HEARTBEAT (or any traffic standing in for one) was just
    /// observed from `connection_id`.
    pub fn note_heartbeat(&self, connection_id: &str) {
        if let Some(tracked) = self.connections.read().get(connection_id) {
            let t = now_ms(self.epoch);
            tracked.last_seen.store(t, Ordering::Release);
            let mut info = tracked.info.write();
            info.is_alive = true;
            info.last_heartbeat_ms = t;
        }
    }

    pub fn info(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.connections.read().get(connection_id).map(|t| t.info.read().clone())
    }

    /// Sweep all tracked connections, marking any that have not sent a
    /// heartbeat within [`HEARTBEAT_TIMEOUT`] as dead. Returns the ids newly
    /// marked dead in this sweep, so callers can run `PeerLost` cleanup
    /// exactly once per transition.
    pub fn sweep_timeouts(&self) -> Vec<String> {
        let now = now_ms(self.epoch);
        let connections = self.connections.read();
        let mut newly_dead = Vec::new();
        for (id, tracked) in connections.iter() {
            let last_seen = tracked.last_seen.load(Ordering::Acquire);
            let mut info = tracked.info.write();
            if info.is_alive && now.saturating_sub(last_seen) > self.timeout.as_millis() as u64 {
                info.is_alive = false;
                warn!(connection_id = %id, "peer heartbeat timed out");
                newly_dead.push(id.clone());
            }
        }
        newly_dead
    }

    /// Drop a connection's tracking state entirely for an explicit, orderly
    /// disconnect — the [`reap_connection`](Self::reap_connection) path
    /// handles the same teardown for a peer declared lost by the sweep.
    pub fn cleanup_connection_resources(&self, connection_id: &str) {
        self.connections.write().remove(connection_id);
        self.shmem.drop_pool(connection_id);
    }

    pub fn is_alive(&self, connection_id: &str) -> bool {
        self.connections.read().get(connection_id).is_some_and(|t| t.info.read().is_alive)
    }

    /// Stop the background sweep thread and wait for it to exit, so tests
    /// (and process shutdown) don't leak a running thread behind a dropped
    /// manager.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.heartbeat_thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Fail a pending call because its connection was declared dead mid-flight.
/// Exists as a named helper so run-loop integration sites don't construct
/// this classification ad hoc in several places.
pub fn peer_lost_error() -> IpcError {
    IpcError::PeerLost
}
