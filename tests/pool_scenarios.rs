//! Workspace pool behaviour under the scenarios a filesystem drives it through

use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use zstd_wsm::level::{levels, TOP_BUCKET};
use zstd_wsm::{
    clip_level, MockCodec, PoolConfig, SizeTable, WorkspaceManager, ZstdCodec, MAX_LEVEL,
    MIN_LEVEL,
};

fn mock_pool() -> (MockCodec, WorkspaceManager<MockCodec>) {
    let codec = MockCodec::new();
    let handle = codec.clone();
    (handle, WorkspaceManager::new(codec, PoolConfig::manual()))
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_size_table_is_monotonic() {
    let table = SizeTable::build(&ZstdCodec::new());
    let all: Vec<i32> = levels().collect();
    for (i, &l1) in all.iter().enumerate() {
        for &l2 in &all[i + 1..] {
            assert!(table.for_level(l1) <= table.for_level(l2));
        }
    }
}

#[test]
fn test_fresh_pool_serves_default_level_without_allocating() {
    let wsm = WorkspaceManager::new(ZstdCodec::new(), PoolConfig::manual());
    let ws = wsm.acquire(3);
    assert!(ws.size() >= wsm.sizes().for_level(3));
    assert_eq!(wsm.stats().allocated, 1, "only the preallocated workspace");
}

#[test]
fn test_acquire_release_cycle_across_levels() {
    let (_, wsm) = mock_pool();

    let ws = wsm.acquire(1);
    assert!(ws.size() >= wsm.sizes().for_level(1));
    wsm.release(ws);

    let ws = wsm.acquire(5);
    assert!(ws.size() >= wsm.sizes().for_level(5));
    wsm.release(ws);

    let ws = wsm.acquire(1);
    assert!(ws.size() >= wsm.sizes().for_level(1));
    assert!(ws.bucket() >= clip_level(1));
    wsm.release(ws);

    let stats = wsm.stats();
    assert_eq!(stats.borrowed, 0);
    assert_eq!(stats.idle_total() as u64, stats.allocated);
}

#[test]
fn test_blocked_acquire_wakes_on_top_release() {
    let (handle, wsm) = mock_pool();
    let wsm = Arc::new(wsm);
    handle.set_fail_alloc(true);

    let first = wsm.acquire(MAX_LEVEL);
    let first_id = first.id();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let wsm = Arc::clone(&wsm);
        thread::spawn(move || {
            let ws = wsm.acquire(MAX_LEVEL);
            tx.send(ws.id()).ok();
        })
    };

    wait_for("waiter to block", || wsm.stats().waits >= 1);
    assert!(rx.try_recv().is_err(), "waiter must not get a workspace yet");
    assert!(handle.alloc_failures() >= 1);

    drop(first);
    let id = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("waiter woken by release");
    assert_eq!(id, first_id);
    waiter.join().expect("waiter thread");

    assert_eq!(wsm.stats().borrowed, 0);
    assert_eq!(handle.allocs(), 1);
}

#[test]
fn test_reclaim_frees_expired_and_clears_bit() {
    let (_, wsm) = mock_pool();

    let top = wsm.acquire(MAX_LEVEL);
    let small = wsm.acquire(6);
    let bucket = small.bucket();
    assert_eq!(bucket, clip_level(6));
    drop(top);
    drop(small);

    let stats = wsm.stats();
    assert!(stats.is_active(bucket));
    assert_eq!(stats.lru_len, 1);

    let freed = wsm.reclaim_expired(Instant::now() + 2 * wsm.reclaim_threshold());
    assert_eq!(freed, 1);
    let stats = wsm.stats();
    assert!(!stats.is_active(bucket));
    assert_eq!(stats.idle[bucket], 0);
    assert!(stats.is_active(TOP_BUCKET));
}

#[test]
fn test_borrowed_workspace_is_never_reclaimed() {
    let (_, wsm) = mock_pool();

    let top = wsm.acquire(MAX_LEVEL);
    let small = wsm.acquire(4);
    let id = small.id();
    drop(top);
    drop(small);
    assert!(wsm.is_reclaim_candidate(id));

    // a smaller level borrows it; it keeps its LRU slot
    let borrowed = wsm.acquire(1);
    assert_eq!(borrowed.id(), id);
    assert!(wsm.is_reclaim_candidate(id));

    let later = Instant::now() + 2 * wsm.reclaim_threshold();
    assert_eq!(wsm.reclaim_expired(later), 0);
    assert_eq!(borrowed.requested_level(), 1);

    drop(borrowed);
    assert_eq!(wsm.reclaim_expired(later), 1);
    assert!(!wsm.is_reclaim_candidate(id));
}

#[test]
fn test_second_top_workspace_enters_lru() {
    let (_, wsm) = mock_pool();

    let first = wsm.acquire(MAX_LEVEL);
    let second = wsm.acquire(MAX_LEVEL);
    assert_eq!(wsm.stats().allocated, 2);

    drop(first);
    assert_eq!(wsm.stats().lru_len, 0, "sole idle top workspace is protected");
    drop(second);
    assert_eq!(wsm.stats().lru_len, 1);

    let freed = wsm.reclaim_expired(Instant::now() + 2 * wsm.reclaim_threshold());
    assert_eq!(freed, 1);
    assert_eq!(wsm.stats().idle[TOP_BUCKET], 1);
}

#[test]
fn test_background_thread_reclaims() {
    let codec = MockCodec::new();
    let wsm = WorkspaceManager::new(
        codec,
        PoolConfig {
            reclaim_threshold_secs: 0,
            ..PoolConfig::default()
        },
    );

    let top = wsm.acquire(MAX_LEVEL);
    let small = wsm.acquire(3);
    drop(top);
    drop(small);

    wait_for("reclaim thread", || wsm.stats().reclaimed >= 1);
    let stats = wsm.stats();
    assert_eq!(stats.idle[clip_level(3)], 0);
    assert_eq!(stats.idle[TOP_BUCKET], 1);
    wsm.shutdown();
}

#[test]
fn test_no_double_issue_under_contention() {
    let wsm = Arc::new(WorkspaceManager::new(MockCodec::new(), PoolConfig::manual()));
    let held = Arc::new(Mutex::new(HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let wsm = Arc::clone(&wsm);
            let held = Arc::clone(&held);
            thread::spawn(move || {
                for i in 0..300 {
                    let level = ((t * 5 + i) % (MAX_LEVEL as usize)) as i32 + 1;
                    let ws = wsm.acquire(level);
                    assert!(ws.bucket() >= clip_level(level));
                    assert!(held.lock().insert(ws.id()), "workspace issued twice");
                    thread::yield_now();
                    assert!(held.lock().remove(&ws.id()));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker");
    }
    let stats = wsm.stats();
    assert_eq!(stats.borrowed, 0);
    assert_eq!(stats.idle_total() as u64, stats.allocated);
}

#[derive(Debug, Clone)]
enum Op {
    Acquire(i32),
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (MIN_LEVEL..=MAX_LEVEL).prop_map(Op::Acquire),
        any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn prop_pool_bookkeeping(ops in proptest::collection::vec(op(), 1..64)) {
        let (_, wsm) = mock_pool();
        let mut guards = Vec::new();

        for op in ops {
            match op {
                Op::Acquire(level) => {
                    let ws = wsm.acquire(level);
                    let level = if level == 0 { 1 } else { level };
                    prop_assert!(ws.bucket() >= clip_level(level));
                    prop_assert!(ws.size() >= wsm.sizes().for_level(level));
                    prop_assert_eq!(ws.requested_level(), level);
                    guards.push(ws);
                }
                Op::Release(pick) if !guards.is_empty() => {
                    let ws = guards.swap_remove(pick % guards.len());
                    wsm.release(ws);
                }
                Op::Release(_) => {}
            }

            let stats = wsm.stats();
            for (bucket, &count) in stats.idle.iter().enumerate() {
                prop_assert_eq!(stats.is_active(bucket), count > 0);
            }
            prop_assert_eq!(stats.borrowed, guards.len());
            prop_assert_eq!(stats.idle_total() + guards.len(), stats.allocated as usize);
            prop_assert!(stats.lru_len <= stats.idle_total());
            for ws in &guards {
                if ws.bucket() == clip_level(ws.requested_level()) {
                    prop_assert!(!wsm.is_reclaim_candidate(ws.id()));
                }
            }
        }
    }
}
