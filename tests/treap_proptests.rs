//! Property-based tests for the persistent treap.
//!
//! Differential testing against a `BTreeMap` oracle: every version produced
//! by path copying must keep answering exactly what the oracle held at that
//! version, and stay a valid treap.

#![expect(clippy::unwrap_used, reason = "fail fast in tests")]

mod common;

use common::{State, answer, initial_state};
use contreap::priority::priority;
use contreap::treap::{self, Link};
use proptest::prelude::*;

/// Small key space so duplicates and deletes of present keys are common.
const KEY_SPACE: u64 = 64;

// ============================================================================
//  Strategies
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Op {
    Insert(u64),
    Delete(u64),
}

fn key() -> impl Strategy<Value = u64> {
    0..KEY_SPACE
}

fn initial_keys(max: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(key(), 0..=max)
}

fn operations(max: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => key().prop_map(Op::Insert),
            2 => key().prop_map(Op::Delete),
        ],
        0..=max,
    )
}

fn as_entries(state: &State) -> Vec<(u64, u64)> {
    state.iter().map(|(&k, &v)| (k, v)).collect()
}

/// Apply `ops` with the sequential path-copying algorithms, returning every
/// version's root alongside the oracle's states.
fn run(keys: &[u64], ops: &[Op]) -> (Vec<Link>, Vec<State>) {
    let root = treap::build(keys);
    treap::augment(&root);
    let mut roots = vec![root];
    let mut state = initial_state(keys);
    let mut states = vec![state.clone()];
    for (i, &op) in ops.iter().enumerate() {
        let version = i + 1;
        let past = &roots[i];
        let next = match op {
            Op::Insert(key) => {
                *state.entry(key).or_default() += 1;
                treap::search_insert(version, past, priority(key), key)
            }
            Op::Delete(key) => {
                if let Some(count) = state.get_mut(&key) {
                    *count -= 1;
                    if *count == 0 {
                        state.remove(&key);
                    }
                }
                treap::search_delete(version, past, priority(key), key)
            }
        };
        treap::augment(&next);
        roots.push(next);
        states.push(state.clone());
    }
    (roots, states)
}

// ============================================================================
//  Properties
// ============================================================================

proptest! {
    #[test]
    fn build_matches_oracle(keys in initial_keys(200)) {
        let root = treap::build(&keys);
        treap::augment(&root);
        treap::check_invariants(&root).unwrap();
        prop_assert_eq!(treap::entries(&root), as_entries(&initial_state(&keys)));
    }

    #[test]
    fn parallel_build_matches_sequential(keys in initial_keys(400)) {
        let sequential = treap::build(&keys);
        treap::augment(&sequential);
        let parallel = treap::build_parallel(&keys);
        prop_assert_eq!(treap::entries(&parallel), treap::entries(&sequential));
        prop_assert_eq!(
            treap::range_aggregate(&parallel, 0, KEY_SPACE),
            treap::range_aggregate(&sequential, 0, KEY_SPACE)
        );
    }

    #[test]
    fn every_version_stays_valid(keys in initial_keys(50), ops in operations(80)) {
        let (roots, states) = run(&keys, &ops);
        for (root, state) in roots.iter().zip(&states) {
            treap::check_invariants(root).unwrap();
            prop_assert_eq!(treap::entries(root), as_entries(state));
        }
    }

    #[test]
    fn point_lookups_match_oracle(
        keys in initial_keys(50),
        ops in operations(60),
        probes in prop::collection::vec(key(), 1..20),
    ) {
        let (roots, states) = run(&keys, &ops);
        for (root, state) in roots.iter().zip(&states) {
            for &probe in &probes {
                prop_assert_eq!(treap::value_of(root, probe), answer(state, probe, probe));
            }
        }
    }

    #[test]
    fn range_aggregates_match_oracle(
        keys in initial_keys(50),
        ops in operations(60),
        ranges in prop::collection::vec((key(), key()), 1..20),
    ) {
        let (roots, states) = run(&keys, &ops);
        for (root, state) in roots.iter().zip(&states) {
            for &(lo, hi) in &ranges {
                prop_assert_eq!(treap::range_aggregate(root, lo, hi), answer(state, lo, hi));
            }
        }
    }

    #[test]
    fn shape_depends_only_on_key_set(mut keys in prop::collection::hash_set(key(), 0..40)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>()))
    {
        let forward = treap::build(&keys);
        keys.reverse();
        let backward = treap::build(&keys);
        let shape = |link: &Link| link.as_ref().map(|node| node.key());
        prop_assert_eq!(shape(&forward), shape(&backward));
        treap::check_invariants(&backward).unwrap();
    }
}
