//! Workspace pool manager
//!
//! Idle workspaces are kept in one list per bucket, with a bitmap of the
//! buckets that have any. A request scans the bitmap upward from its own
//! bucket, so a larger idle workspace is reused before a new one is
//! allocated. Only a workspace borrowed and returned by its own bucket
//! refreshes its place in the global LRU; one serving a smaller level keeps
//! its old place and stays a candidate for reclaim in favour of a right-sized
//! allocation later.
//!
//! Forward progress comes from a protected max-level workspace: while the
//! top bucket has no idle entry, a returning workspace is kept out of the
//! LRU, and only top-bucket releases wake callers blocked on a failed
//! allocation.

use super::size_table::SizeTable;
use super::workspace::Workspace;
use crate::codec::Codec;
use crate::config::PoolConfig;
use crate::level::{clip_level, resolve_level, BUCKETS, MAX_LEVEL, TOP_BUCKET};
use crate::metrics::{self, PoolEvent};
use lru::LruCache;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Position of an idle workspace in the reclaim LRU
#[derive(Debug, Clone, Copy)]
struct LruSlot {
    bucket: usize,
    last_used: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    allocated: u64,
    alloc_failures: u64,
    reused: u64,
    reused_larger: u64,
    reclaimed: u64,
    waits: u64,
}

struct PoolState<C: Codec> {
    /// Idle workspaces per bucket, most recently returned last
    idle: Vec<Vec<Workspace<C>>>,
    /// Bit `b` set iff `idle[b]` is non-empty
    active_map: u32,
    /// Reclaim candidates keyed by workspace id, most recent first
    lru: LruCache<u64, LruSlot>,
    /// Deadline of the armed reclaim timer
    timer: Option<Instant>,
    /// Bumped by every top-bucket release
    wake_gen: u64,
    borrowed: usize,
    shutdown: bool,
    counters: Counters,
}

impl<C: Codec> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: (0..BUCKETS).map(|_| Vec::new()).collect(),
            active_map: 0,
            lru: LruCache::unbounded(),
            timer: None,
            wake_gen: 0,
            borrowed: 0,
            shutdown: false,
            counters: Counters::default(),
        }
    }

    fn idle_count(&self) -> usize {
        self.idle.iter().map(Vec::len).sum()
    }

    /// Pop the first idle workspace at or above the level's bucket.
    fn take_idle(&mut self, level: i32) -> Option<Workspace<C>> {
        let home = clip_level(level);
        let mut bits = self.active_map & (u32::MAX << home);

        while bits != 0 {
            let bucket = bits.trailing_zeros() as usize;
            bits &= bits - 1;

            let Some(mut ws) = self.idle[bucket].pop() else {
                continue;
            };
            ws.req_level = level;
            if ws.bucket == home {
                self.lru.pop(&ws.id);
                self.counters.reused += 1;
                metrics::record_event(PoolEvent::Reuse, 1);
            } else {
                self.counters.reused_larger += 1;
                metrics::record_event(PoolEvent::ReuseLarger, 1);
            }
            if self.idle[bucket].is_empty() {
                self.active_map &= !(1 << bucket);
            }
            self.borrowed += 1;
            return Some(ws);
        }
        None
    }

    /// Return a workspace to its bucket.
    ///
    /// Yields (top bucket release, timer newly armed).
    fn put(&mut self, mut ws: Workspace<C>, threshold: Duration) -> (bool, bool) {
        let mut armed = false;
        // while no top workspace is idle, the returning one stays out of reclaim
        if ws.at_home() && !self.idle[TOP_BUCKET].is_empty() {
            let now = Instant::now();
            ws.last_used = now;
            self.lru.put(
                ws.id,
                LruSlot {
                    bucket: ws.bucket,
                    last_used: now,
                },
            );
            if self.timer.is_none() {
                self.timer = Some(now + threshold);
                armed = true;
            }
        }

        let bucket = ws.bucket;
        ws.req_level = 0;
        self.active_map |= 1 << bucket;
        self.idle[bucket].push(ws);

        let top = bucket == TOP_BUCKET;
        if top {
            self.wake_gen = self.wake_gen.wrapping_add(1);
        }
        (top, armed)
    }

    /// One timer pass: free LRU entries idle since before `now - threshold`.
    fn reclaim(&mut self, now: Instant, threshold: Duration) -> Vec<Workspace<C>> {
        let mut victims = Vec::new();
        if self.lru.is_empty() {
            return victims;
        }

        if let Some(cutoff) = now.checked_sub(threshold) {
            let expired: Vec<(u64, LruSlot)> = self
                .lru
                .iter()
                .rev()
                .take_while(|(_, slot)| slot.last_used <= cutoff)
                .map(|(id, slot)| (*id, *slot))
                .collect();

            for (id, slot) in expired {
                let idle = &mut self.idle[slot.bucket];
                // borrowed by a smaller level, keeps its place
                let Some(pos) = idle.iter().position(|ws| ws.id == id) else {
                    continue;
                };
                self.lru.pop(&id);
                victims.push(idle.remove(pos));
                if idle.is_empty() {
                    self.active_map &= !(1 << slot.bucket);
                }
            }
        }

        self.counters.reclaimed += victims.len() as u64;
        if !self.lru.is_empty() {
            self.timer = Some(now + threshold);
        }
        victims
    }
}

pub(crate) struct Shared<C: Codec> {
    codec: C,
    sizes: SizeTable,
    threshold: Duration,
    state: Mutex<PoolState<C>>,
    /// Callers blocked after a failed allocation
    wait: Condvar,
    /// Reclaim thread
    timer: Condvar,
}

impl<C: Codec> Shared<C> {
    fn release(&self, ws: Workspace<C>) {
        let id = ws.id;
        let mut state = self.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);

        if state.shutdown {
            drop(state);
            debug!(id, "Workspace returned after shutdown, freeing");
            drop(ws);
            return;
        }

        let (top, armed) = state.put(ws, self.threshold);
        metrics::set_idle(state.idle_count());
        drop(state);

        metrics::record_event(PoolEvent::Release, 1);
        if armed {
            self.timer.notify_one();
        }
        if top {
            self.wait.notify_all();
        }
        debug!(id, top, "Released workspace");
    }
}

/// Snapshot of pool state
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Idle workspaces per bucket
    pub idle: Vec<usize>,
    pub active_map: u32,
    pub lru_len: usize,
    pub borrowed: usize,
    /// Memory held by idle workspaces
    pub idle_bytes: usize,
    pub timer_armed: bool,
    pub allocated: u64,
    pub alloc_failures: u64,
    pub reused: u64,
    pub reused_larger: u64,
    pub reclaimed: u64,
    pub waits: u64,
}

impl PoolStats {
    pub fn idle_total(&self) -> usize {
        self.idle.iter().sum()
    }

    pub fn is_active(&self, bucket: usize) -> bool {
        self.active_map & (1 << bucket) != 0
    }
}

/// Level-indexed pool of codec workspaces
///
/// `new` is the subsystem init, [`WorkspaceManager::shutdown`] (or drop) the
/// cleanup. All metadata sits behind one short-held lock; codec work and
/// allocation happen outside it.
pub struct WorkspaceManager<C: Codec> {
    shared: Arc<Shared<C>>,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Codec> WorkspaceManager<C> {
    /// Build the size table, preallocate a max-level workspace and start
    /// the reclaim thread, as configured.
    pub fn new(codec: C, config: PoolConfig) -> Self {
        let sizes = SizeTable::build(&codec);
        let mut state = PoolState::new();

        if config.preallocate {
            match Workspace::alloc(&codec, MAX_LEVEL, sizes.for_level(MAX_LEVEL)) {
                Some(mut ws) => {
                    ws.req_level = 0;
                    state.counters.allocated += 1;
                    state.active_map |= 1 << TOP_BUCKET;
                    state.idle[TOP_BUCKET].push(ws);
                }
                None => warn!(codec = codec.name(), "Cannot preallocate max-level workspace"),
            }
        }

        info!(
            codec = codec.name(),
            top_size = sizes.size_for(TOP_BUCKET),
            reclaim_secs = config.reclaim_threshold_secs,
            "Initialized workspace manager"
        );

        let shared = Arc::new(Shared {
            codec,
            sizes,
            threshold: config.reclaim_threshold(),
            state: Mutex::new(state),
            wait: Condvar::new(),
            timer: Condvar::new(),
        });

        let reclaimer = if config.reclaim_thread {
            let worker = Arc::clone(&shared);
            match std::thread::Builder::new()
                .name("zstd-wsm-reclaim".to_string())
                .spawn(move || reclaim_loop(worker))
            {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!(error = %e, "Failed to start reclaim thread, reclaim disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            shared,
            reclaimer: Mutex::new(reclaimer),
        }
    }

    pub fn codec(&self) -> &C {
        &self.shared.codec
    }

    pub fn sizes(&self) -> &SizeTable {
        &self.shared.sizes
    }

    pub fn reclaim_threshold(&self) -> Duration {
        self.shared.threshold
    }

    /// Borrow a workspace able to serve `level`. Blocks while memory is short.
    ///
    /// Level 0 is served as level 1; levels outside the valid range are
    /// clamped. Never fails: an allocation failure parks the caller until a
    /// max-level workspace is returned, then the whole lookup is retried.
    pub fn acquire(&self, level: i32) -> WorkspaceGuard<C> {
        let level = resolve_level(level);
        loop {
            let seen = {
                let mut state = self.shared.state.lock();
                if let Some(ws) = state.take_idle(level) {
                    metrics::set_idle(state.idle_count());
                    drop(state);
                    debug!(level, id = ws.id, bucket = ws.bucket, "Reusing idle workspace");
                    return self.guard(ws);
                }
                state.wake_gen
            };

            let size = self.shared.sizes.for_level(level);
            if let Some(ws) = Workspace::alloc(&self.shared.codec, level, size) {
                let mut state = self.shared.state.lock();
                state.counters.allocated += 1;
                state.borrowed += 1;
                drop(state);
                metrics::record_event(PoolEvent::Alloc, 1);
                debug!(level, id = ws.id, size, "Allocated new workspace");
                return self.guard(ws);
            }

            let mut state = self.shared.state.lock();
            state.counters.alloc_failures += 1;
            state.counters.waits += 1;
            metrics::record_event(PoolEvent::AllocFailed, 1);
            metrics::record_event(PoolEvent::Wait, 1);
            debug!(level, size, "Workspace allocation failed, waiting for a release");
            while state.wake_gen == seen {
                self.shared.wait.wait(&mut state);
            }
        }
    }

    /// Borrow an idle workspace without allocating or blocking
    pub fn try_acquire(&self, level: i32) -> Option<WorkspaceGuard<C>> {
        let level = resolve_level(level);
        let mut state = self.shared.state.lock();
        let ws = state.take_idle(level)?;
        metrics::set_idle(state.idle_count());
        drop(state);
        Some(self.guard(ws))
    }

    /// Return a workspace; same as dropping the guard
    pub fn release(&self, guard: WorkspaceGuard<C>) {
        drop(guard);
    }

    /// Run one reclaim pass as if the timer fired at `now`.
    ///
    /// Returns the number of workspaces freed.
    pub fn reclaim_expired(&self, now: Instant) -> usize {
        let mut state = self.shared.state.lock();
        state.timer = None;
        let victims = state.reclaim(now, self.shared.threshold);
        metrics::set_idle(state.idle_count());
        drop(state);

        free_victims(victims)
    }

    /// True when the workspace is queued for time-based reclaim
    pub fn is_reclaim_candidate(&self, id: u64) -> bool {
        self.shared.state.lock().lru.contains(&id)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            idle: state.idle.iter().map(Vec::len).collect(),
            active_map: state.active_map,
            lru_len: state.lru.len(),
            borrowed: state.borrowed,
            idle_bytes: state.idle.iter().flatten().map(|ws| ws.size).sum(),
            timer_armed: state.timer.is_some(),
            allocated: state.counters.allocated,
            alloc_failures: state.counters.alloc_failures,
            reused: state.counters.reused,
            reused_larger: state.counters.reused_larger,
            reclaimed: state.counters.reclaimed,
            waits: state.counters.waits,
        }
    }

    /// Free every idle workspace and stop the reclaim thread.
    ///
    /// Workspaces still borrowed are freed when their guards drop.
    pub fn shutdown(&self) {
        let (freed, borrowed) = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.lru.clear();
            state.active_map = 0;
            state.timer = None;
            state.wake_gen = state.wake_gen.wrapping_add(1);
            let freed: Vec<Workspace<C>> = state.idle.iter_mut().flat_map(|l| l.drain(..)).collect();
            (freed, state.borrowed)
        };
        self.shared.timer.notify_all();
        self.shared.wait.notify_all();

        if let Some(handle) = self.reclaimer.lock().take() {
            if handle.join().is_err() {
                warn!("Reclaim thread panicked");
            }
        }

        if borrowed > 0 {
            warn!(borrowed, "Workspaces still borrowed at shutdown");
        }
        metrics::set_idle(0);
        info!(freed = freed.len(), "Workspace manager shut down");
    }

    fn guard(&self, ws: Workspace<C>) -> WorkspaceGuard<C> {
        WorkspaceGuard {
            ws: Some(ws),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Codec> Drop for WorkspaceManager<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn free_victims<C: Codec>(victims: Vec<Workspace<C>>) -> usize {
    let count = victims.len();
    if count > 0 {
        metrics::record_event(PoolEvent::Reclaim, count as u64);
        for ws in &victims {
            debug!(id = ws.id, bucket = ws.bucket, size = ws.size, "Reclaiming idle workspace");
        }
    }
    count
}

fn reclaim_loop<C: Codec>(shared: Arc<Shared<C>>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(deadline) = state.timer else {
            shared.timer.wait(&mut state);
            continue;
        };
        let now = Instant::now();
        if now < deadline {
            shared.timer.wait_until(&mut state, deadline);
            continue;
        }

        state.timer = None;
        let victims = state.reclaim(now, shared.threshold);
        metrics::set_idle(state.idle_count());
        if !victims.is_empty() {
            MutexGuard::unlocked(&mut state, || free_victims(victims));
        }
    }
    debug!("Reclaim thread exiting");
}

/// A borrowed workspace. Dropping it returns the workspace to its pool.
pub struct WorkspaceGuard<C: Codec> {
    // only emptied by drop
    ws: Option<Workspace<C>>,
    shared: Arc<Shared<C>>,
}

impl<C: Codec> WorkspaceGuard<C> {
    pub fn codec(&self) -> &C {
        &self.shared.codec
    }

    /// Codec and workspace borrowed together for the streaming drivers
    pub(crate) fn parts(&mut self) -> (&C, &mut Workspace<C>) {
        match self.ws {
            Some(ref mut ws) => (&self.shared.codec, ws),
            None => unreachable!("workspace guard used after release"),
        }
    }

    fn workspace(&self) -> &Workspace<C> {
        match self.ws {
            Some(ref ws) => ws,
            None => unreachable!("workspace guard used after release"),
        }
    }

    fn workspace_mut(&mut self) -> &mut Workspace<C> {
        self.parts().1
    }
}

impl<C: Codec> Deref for WorkspaceGuard<C> {
    type Target = Workspace<C>;

    fn deref(&self) -> &Self::Target {
        self.workspace()
    }
}

impl<C: Codec> DerefMut for WorkspaceGuard<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.workspace_mut()
    }
}

impl<C: Codec> Drop for WorkspaceGuard<C> {
    fn drop(&mut self) {
        if let Some(ws) = self.ws.take() {
            self.shared.release(ws);
        }
    }
}
