//! Shared test utilities: tracing setup, a `BTreeMap` oracle, and engine
//! replay helpers.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let (engine, results) = common::replay(Method::Pam, common::config(4, 2, 8), &workload);
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `contreap=debug,contreap::scheduler=trace`).
//!   Events are only emitted when the crate is built with `--features tracing`.
//! - `CONTREAP_LOG_DIR`: Log directory (default: `logs/`)
//! - `CONTREAP_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! Logs are appended to `logs/contreap.jsonl` as newline-delimited JSON:
//!
//! ```bash
//! # Hand-offs of one scheduler task
//! jq 'select(.fields.task == 16)' logs/contreap.jsonl
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use contreap::{Engine, EngineConfig, Method, QueryResults, Transaction, Workload, engine};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

// ============================================================================
//  Tracing
// ============================================================================

static INIT: Once = Once::new();

/// Install console and NDJSON file layers once per test process.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[expect(clippy::expect_used)]
fn setup_tracing() {
    let dir = env::var("CONTREAP_LOG_DIR").map_or_else(|_| PathBuf::from("logs"), PathBuf::from);
    let console = env::var("CONTREAP_LOG_CONSOLE").map_or(true, |v| v != "0");

    std::fs::create_dir_all(&dir).expect("Failed to create log directory");
    // append: nextest runs every test in its own process
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("contreap.jsonl"))
        .expect("Failed to open log file");

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .compact()
            .with_filter(filter())
    });
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_thread_names(true)
        .with_target(true)
        .json()
        .with_filter(filter());

    let _ = Registry::default().with(console_layer).with(file_layer).try_init();
}

// ============================================================================
//  Oracle
// ============================================================================

/// Key counts of one version.
pub type State = BTreeMap<u64, u64>;

/// State after inserting `keys` into an empty map.
pub fn initial_state(keys: &[u64]) -> State {
    let mut state = State::new();
    for &key in keys {
        *state.entry(key).or_default() += 1;
    }
    state
}

/// Apply one transaction; queries leave the state unchanged.
pub fn apply(state: &mut State, transaction: Transaction) {
    match transaction {
        Transaction::Insert(key) => *state.entry(key).or_default() += 1,
        Transaction::Delete(key) => {
            if let Some(count) = state.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    state.remove(&key);
                }
            }
        }
        Transaction::Query { .. } => {}
    }
}

/// Answer of a query against `state`.
pub fn answer(state: &State, lo: u64, hi: u64) -> u64 {
    if lo > hi {
        return 0;
    }
    state.range(lo..=hi).map(|(_, count)| count).sum()
}

/// Every version's state, `0..=transactions.len()`.
pub fn states(workload: &Workload) -> Vec<State> {
    let mut state = initial_state(&workload.keys);
    let mut out = Vec::with_capacity(workload.transactions.len() + 1);
    out.push(state.clone());
    for &transaction in &workload.transactions {
        apply(&mut state, transaction);
        out.push(state.clone());
    }
    out
}

/// Expected answers in submission order.
pub fn expected_answers(workload: &Workload) -> Vec<u64> {
    let mut state = initial_state(&workload.keys);
    let mut answers = Vec::new();
    for &transaction in &workload.transactions {
        if let Transaction::Query { lo, hi } = transaction {
            answers.push(answer(&state, lo, hi));
        }
        apply(&mut state, transaction);
    }
    answers
}

// ============================================================================
//  Engines
// ============================================================================

/// A validated config.
pub fn config(threads: usize, clients: usize, batch_size: usize) -> EngineConfig {
    EngineConfig::new(threads, clients, batch_size).unwrap()
}

/// Run `workload` to completion on `method`.
pub fn replay(method: Method, config: EngineConfig, workload: &Workload) -> (Box<dyn Engine>, QueryResults) {
    let mut engine = engine::create(method, config);
    engine.init(&workload.keys, workload.transactions.len()).unwrap();
    for &transaction in &workload.transactions {
        transaction.apply(engine.as_mut()).unwrap();
    }
    let results = engine.close().unwrap();
    (engine, results)
}

/// Answers sorted back into submission order.
pub fn answers(results: &QueryResults) -> Vec<u64> {
    results.sorted().iter().map(|answer| answer.value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init() {
        init_tracing();
        tracing::info!("Tracing initialized successfully");
        tracing::debug!(task = 16, "Debug event");
    }

    #[test]
    fn oracle_counts_occurrences() {
        let mut state = initial_state(&[5, 10, 15]);
        apply(&mut state, Transaction::Insert(10));
        assert_eq!(answer(&state, 10, 10), 2);
        apply(&mut state, Transaction::Delete(5));
        apply(&mut state, Transaction::Delete(99));
        assert_eq!(answer(&state, 0, 20), 3);
        assert_eq!(answer(&state, 20, 0), 0);
    }
}
