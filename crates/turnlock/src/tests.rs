// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end behavior of the lock service.
//!
//! Managers sharing one memory provider stand in for separate processes
//! sharing an external facility.

use crate::provider::ExternalLockProvider;
use crate::providers::fs::FsLockProvider;
use crate::providers::memory::MemoryLockProvider;
use crate::{CancelToken, ContextScope, LockError, LockManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn shared_provider() -> Arc<MemoryLockProvider> {
    Arc::new(MemoryLockProvider::new())
}

fn manager_over(provider: &Arc<MemoryLockProvider>) -> LockManager {
    LockManager::new(provider.clone())
}

#[test]
fn test_nested_acquire_is_reentrant() {
    let provider = shared_provider();
    let manager = manager_over(&provider);
    let peer = manager_over(&provider);

    let outer = manager.acquire("task", "jobs/reindex", 60u64).unwrap();
    let inner = manager.acquire("task", "jobs/reindex", 60u64).unwrap();

    assert!(outer.is_granted());
    assert!(!outer.is_secondary());
    assert!(inner.is_granted());
    assert!(inner.is_secondary());
    assert!(inner.shares_hold_with(&outer));
    assert_eq!(inner.owning_context_id(), outer.owning_context_id());

    // Releasing the secondary keeps the lock held.
    inner.dispose();
    assert!(outer.is_granted());
    assert!(peer.try_acquire("peer", "jobs/reindex", 0u64).unwrap().is_none());

    // Releasing the primary releases it for everyone.
    outer.dispose();
    let reacquired = peer.try_acquire("peer", "jobs/reindex", 0u64).unwrap();
    assert!(reacquired.is_some());
}

#[test]
fn test_primary_release_ignores_live_secondaries() {
    let provider = shared_provider();
    let manager = manager_over(&provider);
    let peer = manager_over(&provider);

    let outer = manager.acquire("task", "jobs/a", 60u64).unwrap();
    let inner = manager.acquire("task", "jobs/a", 60u64).unwrap();
    assert!(inner.is_secondary());

    // The external token follows the primary, not the secondaries.
    outer.dispose();
    assert!(peer.try_acquire("peer", "jobs/a", 0u64).unwrap().is_some());

    inner.dispose();
}

#[test]
fn test_try_once_then_acquire_after_release() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = thread::spawn({
        let manager = manager.clone();
        move || {
            let handle = manager.acquire("holder", "jobs/a", 60u64).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            handle.dispose();
        }
    });

    held_rx.recv().unwrap();
    assert!(manager.try_acquire("prober", "jobs/a", 0u64).unwrap().is_none());

    release_tx.send(()).unwrap();
    holder.join().unwrap();

    let started = Instant::now();
    let handle = manager.acquire("prober", "jobs/a", 60u64).unwrap();
    assert!(handle.is_granted());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_acquire_times_out_while_held() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder = thread::spawn({
        let manager = manager.clone();
        move || {
            let handle = manager.acquire("holder", "jobs/a", 60u64).unwrap();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(handle);
        }
    });

    held_rx.recv().unwrap();
    let started = Instant::now();
    let err = manager.acquire("waiter", "jobs/a", 2u64).unwrap_err();
    let waited = started.elapsed();

    match &err {
        LockError::Timeout { provider, name, waited } => {
            assert_eq!(provider, "memory");
            assert_eq!(name, "jobs/a");
            assert!(*waited >= Duration::from_millis(1500));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(waited >= Duration::from_millis(1500), "returned after {waited:?}");
    assert!(waited < Duration::from_secs(20), "returned after {waited:?}");

    release_tx.send(()).unwrap();
    holder.join().unwrap();
}

#[test]
fn test_distinct_names_are_concurrent() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let barrier = Arc::new(std::sync::Barrier::new(2));
    let workers: Vec<_> = ["jobs/a", "jobs/b"]
        .into_iter()
        .map(|name| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let handle = manager.acquire("worker", name, 0u64).unwrap();
                assert!(handle.is_granted());
                thread::sleep(Duration::from_millis(50));
                handle.dispose();
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_repeated_acquire_cycles() {
    let provider = shared_provider();
    let manager = manager_over(&provider);

    for _ in 0..1000 {
        let handle = manager.acquire("cycler", "jobs/churn", 0u64).unwrap();
        assert!(handle.is_granted());
        handle.dispose();
    }
    assert_eq!(manager.proxy_count(), 0);
}

#[test]
fn test_mutual_exclusion_across_managers() {
    let provider = shared_provider();
    let in_critical = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let provider = provider.clone();
            let in_critical = in_critical.clone();
            thread::spawn(move || {
                let manager = manager_over(&provider);
                for _ in 0..10 {
                    let handle = manager.acquire(format!("worker-{worker}").as_str(), "jobs/shared", 30u64).unwrap();
                    assert!(!in_critical.swap(true, Ordering::SeqCst), "two primaries held the lock at once");
                    thread::sleep(Duration::from_millis(1));
                    in_critical.store(false, Ordering::SeqCst);
                    handle.dispose();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_fifo_grant_order_within_process() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = manager.acquire("holder", "jobs/a", 60u64).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|index| {
            let manager = manager.clone();
            let order = order.clone();
            thread::spawn(move || {
                // Staggered entry pins the enqueue order to the index order.
                thread::sleep(Duration::from_millis(60 * (index as u64 + 1)));
                let handle = manager.acquire("waiter", "jobs/a", 60u64).unwrap();
                order.lock().unwrap().push(index);
                thread::sleep(Duration::from_millis(10));
                handle.dispose();
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(400));
    holder.dispose();

    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn test_cancel_before_grant_fails_cancel_after_grant_keeps_hold() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let holder_cancel = CancelToken::never();
    let holder = manager.acquire("holder", "jobs/a", holder_cancel.clone()).unwrap();

    // Cancelling after the grant does not release the hold.
    holder_cancel.cancel();
    assert!(holder.is_granted());

    let waiter_cancel = CancelToken::never();
    let waiter = thread::spawn({
        let manager = manager.clone();
        let cancel = waiter_cancel.clone();
        move || manager.acquire("waiter", "jobs/a", cancel)
    });

    thread::sleep(Duration::from_millis(100));
    waiter_cancel.cancel();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(err.is_timeout());
    assert!(holder.is_granted());

    holder.dispose();
}

#[test]
fn test_backoff_hands_off_to_requesting_process() {
    let provider = shared_provider();
    let holder_manager = manager_over(&provider);
    let waiter_manager = Arc::new(manager_over(&provider));

    let held = holder_manager.acquire("holder", "jobs/a", 60u64).unwrap();
    held.set_dispose_proxy_on_close(false);

    let waiter = thread::spawn({
        let manager = waiter_manager.clone();
        move || {
            let started = Instant::now();
            let handle = manager.acquire("waiter", "jobs/a", 10u64).unwrap();
            let waited = started.elapsed();
            handle.dispose();
            waited
        }
    });

    // Release only once the waiter has published its request marker, so the
    // handoff probe is guaranteed to see cross-process demand.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !provider.check_lock_request("jobs/a").unwrap() {
        assert!(Instant::now() < deadline, "waiter never published demand");
        thread::sleep(Duration::from_millis(5));
    }
    let released_at = Instant::now();
    held.dispose();

    // The released holder's coordinator is inside its back-off window; a
    // try-once reacquisition must fail without stealing the handoff.
    let steal = holder_manager.try_acquire("holder", "jobs/a", 0u64).unwrap();
    assert!(steal.is_none(), "reacquired during the back-off window");

    let waited = waiter.join().unwrap();
    assert!(waited < Duration::from_secs(5), "waiter starved for {waited:?}");
    assert!(released_at.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_reentrancy_follows_flow_across_threads() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let flow = manager.current_context_id();
    let held = manager.acquire("task", "jobs/a", 60u64).unwrap();

    let nested = thread::spawn({
        let manager = manager.clone();
        move || {
            let _scope = ContextScope::enter(flow);
            let handle = manager.acquire("task", "jobs/a", 60u64).unwrap();
            assert!(handle.is_secondary());
            handle.dispose();
        }
    });
    nested.join().unwrap();

    // Without the scope, another thread is a foreign flow and must wait.
    let foreign = thread::spawn({
        let manager = manager.clone();
        move || manager.try_acquire("task", "jobs/a", 0u64).unwrap().is_none()
    });
    assert!(foreign.join().unwrap());

    held.dispose();
}

#[test]
fn test_barrier_isolates_spawned_work() {
    let provider = shared_provider();
    let manager = Arc::new(manager_over(&provider));

    let flow = manager.current_context_id();
    let held = manager.acquire("parent", "jobs/a", 60u64).unwrap();

    let child = thread::spawn({
        let manager = manager.clone();
        move || {
            let _scope = ContextScope::enter(flow);
            // The child starts on the parent's flow, then severs it.
            manager.barrier();
            manager.try_acquire("child", "jobs/a", 0u64).unwrap().is_none()
        }
    });
    assert!(child.join().unwrap(), "barrier failed to isolate the child flow");

    held.dispose();
}

#[test]
fn test_handle_info_snapshot() {
    let provider = shared_provider();
    let manager = manager_over(&provider);

    let handle = manager.acquire("inspector", "jobs/a", 0u64).unwrap();
    let info = handle.info();
    assert_eq!(info.name, "jobs/a");
    assert_eq!(info.owner, "inspector");
    assert!(info.granted);
    assert!(!info.secondary);
    assert!(!info.disposed);

    let json = serde_json::to_string(&info).unwrap();
    assert!(json.contains("jobs/a"));

    handle.dispose();
    let info = handle.info();
    assert!(!info.granted);
    assert!(info.disposed);
}

#[test]
fn test_two_processes_over_a_lock_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let first = LockManager::new(Arc::new(FsLockProvider::new(dir.path()).unwrap()));
    let second = LockManager::new(Arc::new(FsLockProvider::new(dir.path()).unwrap()));

    let held = first.acquire("proc-1", "jobs/reindex", 30u64).unwrap();
    assert!(second.try_acquire("proc-2", "jobs/reindex", 0u64).unwrap().is_none());

    held.dispose();
    let taken = second.acquire("proc-2", "jobs/reindex", 30u64).unwrap();
    assert!(taken.is_granted());
}

#[test]
fn test_drop_releases_like_dispose() {
    let provider = shared_provider();
    let manager = manager_over(&provider);
    let peer = manager_over(&provider);

    {
        let _handle = manager.acquire("worker", "jobs/a", 0u64).unwrap();
        assert!(peer.try_acquire("peer", "jobs/a", 0u64).unwrap().is_none());
    }

    assert!(peer.try_acquire("peer", "jobs/a", 0u64).unwrap().is_some());
}
