use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use keel_result::Error;
use keel_test_utils::init_tracing_for_tests;
use keel_transaction::{LockManager, LockMode, TxnIdManager};

const LONG: Duration = Duration::from_secs(5);
const SHORT: Duration = Duration::from_millis(20);

#[test]
fn waiter_proceeds_after_holder_releases() {
    init_tracing_for_tests();
    let locks = Arc::new(LockManager::new());
    locks
        .acquire(1, "parents", 0, LockMode::Exclusive, LONG)
        .expect("holder");

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            let res = locks.acquire(2, "parents", 0, LockMode::KeyShare, LONG);
            tx.send(()).expect("send");
            res
        })
    };

    // Still blocked while the exclusive lock is held.
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    locks.release_all(1).expect("release");
    rx.recv_timeout(LONG).expect("waiter woke");
    waiter.join().expect("join").expect("acquired");
    // The waiter now holds KEY SHARE: updates pass, deletes wait.
    locks
        .acquire(3, "parents", 0, LockMode::NoKeyExclusive, SHORT)
        .expect("no key update");
    assert!(matches!(
        locks.acquire(4, "parents", 0, LockMode::Exclusive, SHORT),
        Err(Error::LockTimeout { .. })
    ));
}

#[test]
fn key_share_does_not_block_non_key_update() {
    init_tracing_for_tests();
    let locks = LockManager::new();
    locks
        .acquire(1, "parents", 3, LockMode::KeyShare, SHORT)
        .expect("key share");
    locks
        .acquire(2, "parents", 3, LockMode::NoKeyExclusive, SHORT)
        .expect("no key update");
    // A key change still has to wait for the referencing check.
    assert!(matches!(
        locks.acquire(3, "parents", 3, LockMode::Exclusive, SHORT),
        Err(Error::LockTimeout { row_id: 3, .. })
    ));
}

#[test]
fn share_blocks_any_update() {
    init_tracing_for_tests();
    let locks = LockManager::new();
    locks
        .acquire(1, "children", 0, LockMode::Share, SHORT)
        .expect("share");
    locks
        .acquire(2, "children", 0, LockMode::Share, SHORT)
        .expect("second share");
    assert!(matches!(
        locks.acquire(3, "children", 0, LockMode::NoKeyExclusive, SHORT),
        Err(Error::LockTimeout { .. })
    ));
    // Locks on other rows are independent.
    locks
        .acquire(3, "children", 1, LockMode::Exclusive, SHORT)
        .expect("other row");
}

#[test]
fn ids_from_shared_manager_are_unique_across_threads() {
    let manager = TxnIdManager::new();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                (0..50)
                    .map(|_| manager.begin_transaction().expect("begin").txn_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("join"))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 200);
}
