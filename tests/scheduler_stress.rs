//! Threaded stress tests for the pipelined scheduler.
//!
//! Larger runs than the unit tests, with readers polling snapshots while
//! the scheduler is still building later versions.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use common::{answer, initial_state, states};
use contreap::scheduler::Scheduler;
use contreap::treap::{self, Link};
use contreap::workload::GenerateOptions;
use contreap::{Transaction, Workload};

fn start(threads: usize, capacity: usize, block_size: usize, keys: &[u64]) -> Scheduler {
    Scheduler::new(threads, capacity, block_size, treap::build_parallel(keys)).unwrap()
}

fn submit(scheduler: &mut Scheduler, transaction: Transaction) -> usize {
    match transaction {
        Transaction::Insert(key) => scheduler.insert(key),
        Transaction::Delete(key) => scheduler.delete(key),
        Transaction::Query { .. } => scheduler.nop(),
    }
    .unwrap()
}

#[test]
fn hot_key_contention() {
    common::init_tracing();
    // Every task rewrites the same path, so each one waits on its predecessor.
    let mut scheduler = start(8, 4_000, 32, &[1, 2, 3]);
    for i in 0..4_000u64 {
        if i % 3 == 2 {
            scheduler.delete(2).unwrap();
        } else {
            scheduler.insert(2).unwrap();
        }
    }
    scheduler.close();
    let snapshots = scheduler.snapshots();
    let last = snapshots.snapshot(4_000).unwrap();
    treap::check_invariants(last).unwrap();
    assert_eq!(treap::value_of(last, 2), 1 + 4_000 - 2 * (4_000 / 3));
    assert_eq!(treap::range_aggregate(last, 0, 10), 2 + treap::value_of(last, 2));
}

#[test]
fn every_snapshot_matches_oracle() {
    let workload = Workload::generate(&GenerateOptions {
        records: 1_000,
        transactions: 3_000,
        key_space: 2_000,
        query_ratio: 0.2,
        insert_ratio: 0.5,
        max_range: 0,
        seed: 3,
    });
    let mut scheduler = start(6, workload.transactions.len(), 50, &workload.keys);
    for &transaction in &workload.transactions {
        submit(&mut scheduler, transaction);
    }
    scheduler.close();
    let snapshots = scheduler.snapshots();
    for (version, state) in states(&workload).iter().enumerate().step_by(97) {
        let root = snapshots.snapshot(version).unwrap();
        treap::check_invariants(root).unwrap();
        assert_eq!(treap::range_aggregate(root, 0, u64::MAX), answer(state, 0, u64::MAX));
        assert_eq!(treap::range_aggregate(root, 500, 1_500), answer(state, 500, 1_500));
    }
}

#[test]
fn readers_see_monotonic_committed_versions() {
    let keys: Vec<u64> = (0..500).collect();
    let initial = initial_state(&keys);
    let total = 5_000;
    let mut scheduler = start(4, total, 16, &keys);
    let snapshots = scheduler.snapshots();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let snapshots = snapshots.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_seen = 0;
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) {
                    let issued = snapshots.last_version();
                    // only full blocks are readable before close
                    let version = issued / 16 * 16;
                    assert!(version >= last_seen);
                    if version > 0 {
                        let root: &Link = snapshots.snapshot(version).unwrap();
                        // every task inserts a fresh key above the initial range
                        assert_eq!(treap::range_aggregate(root, 0, u64::MAX), 500 + version as u64);
                    }
                    last_seen = version;
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for key in 0..total as u64 {
        scheduler.insert(1_000 + key).unwrap();
    }
    scheduler.close();
    done.store(true, Ordering::Release);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    let root = snapshots.snapshot(total).unwrap();
    assert_eq!(treap::range_aggregate(root, 0, 499), answer(&initial, 0, 499));
}
