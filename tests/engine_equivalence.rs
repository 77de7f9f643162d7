//! Cross-engine equivalence.
//!
//! Every engine replays the same workload; queued answers and synchronous
//! reads of every version must agree with the `BTreeMap` oracle whatever the
//! thread count, client count or batch size.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use common::{answer, answers, config, expected_answers, replay, states};
use contreap::workload::GenerateOptions;
use contreap::{Method, Transaction, Workload};
use proptest::prelude::*;

fn workload(seed: u64, records: usize, transactions: usize, key_space: u64) -> Workload {
    Workload::generate(&GenerateOptions {
        records,
        transactions,
        key_space,
        query_ratio: 0.4,
        insert_ratio: 0.3,
        max_range: key_space / 4,
        seed,
    })
}

fn check_every_version(method: Method, threads: usize, batch_size: usize, workload: &Workload) {
    let (engine, results) = replay(method, config(threads, 2, batch_size), workload);
    assert_eq!(answers(&results), expected_answers(workload), "{method} queued answers");
    for (version, state) in states(workload).iter().enumerate() {
        for (lo, hi) in [(0, u64::MAX), (3, 3), (10, 40), (40, 10)] {
            assert_eq!(
                engine.evaluate(version, lo, hi),
                answer(state, lo, hi),
                "{method} version {version} [{lo}, {hi}]"
            );
        }
    }
    assert_eq!(engine.last_version(), workload.transactions.len());
}

#[test]
fn example_scenario_on_every_engine() {
    common::init_tracing();
    let workload = Workload {
        keys: vec![5, 10, 15],
        transactions: vec![
            Transaction::Insert(10),
            Transaction::Delete(5),
            Transaction::Query { lo: 10, hi: 10 },
            Transaction::Query { lo: 6, hi: 20 },
        ],
    };
    for method in Method::ALL {
        let (engine, results) = replay(method, config(4, 1, 2), &workload);
        assert_eq!(answers(&results), [2, 3], "{method}");
        assert_eq!(engine.evaluate(0, 0, 20), 3, "{method}");
        assert_eq!(engine.evaluate(1, 10, 10), 2, "{method}");
        assert_eq!(engine.evaluate(1, 0, 20), 4, "{method}");
        assert_eq!(engine.evaluate(2, 5, 5), 0, "{method}");
        assert_eq!(engine.evaluate(2, 0, 20), 3, "{method}");
        assert_eq!(engine.evaluate(1, 6, 20), 3, "{method}");
    }
}

#[test]
fn engines_agree_across_configurations() {
    let workload = workload(11, 200, 600, 128);
    for method in Method::ALL {
        for (threads, batch_size) in [(1, 1), (2, 7), (5, 64), (8, 1000)] {
            check_every_version(method, threads, batch_size, &workload);
        }
    }
}

#[test]
fn empty_initial_tree_and_heavy_deletes() {
    let workload = Workload::generate(&GenerateOptions {
        records: 0,
        transactions: 500,
        key_space: 16,
        query_ratio: 0.3,
        insert_ratio: 0.3,
        max_range: 8,
        seed: 5,
    });
    for method in Method::ALL {
        check_every_version(method, 4, 16, &workload);
    }
}

#[test]
fn query_only_workload() {
    let workload = Workload::generate(&GenerateOptions {
        records: 300,
        transactions: 200,
        key_space: 1_000,
        query_ratio: 1.0,
        insert_ratio: 0.0,
        max_range: 100,
        seed: 9,
    });
    for method in Method::ALL {
        let (_, results) = replay(method, config(3, 3, 10), &workload);
        assert_eq!(answers(&results), expected_answers(&workload), "{method}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn random_workloads_agree(
        seed in any::<u64>(),
        threads in 1usize..6,
        batch_size in 1usize..40,
        clients in 1usize..4,
    ) {
        let workload = workload(seed, 64, 300, 96);
        let expected = expected_answers(&workload);
        for method in Method::ALL {
            let (_, results) = replay(method, config(threads, clients, batch_size), &workload);
            prop_assert_eq!(results.per_worker.len(), clients);
            prop_assert_eq!(answers(&results), expected.clone());
        }
    }
}
