//! # `contreap`
//!
//! A versioned, concurrently updatable index of `u64` keys with occurrence
//! counts, built on a persistent treap.
//!
//! Every update produces a new version by path copying, so every past
//! version stays readable. Readers ask for the count of one key or the sum
//! of counts over a key range, as of any version.
//!
//! Three engines execute the same operation stream:
//!
//! | Method | Engine | Update strategy |
//! |--------|--------|-----------------|
//! | `sequential` | [`engine::Sequential`] | One path copy per update on the issuing thread |
//! | `contreap` | [`engine::Pipelined`] | Updates pipelined level by level across threads ([`scheduler`]) |
//! | `pam` | [`engine::Batch`] | Buffered batches merged with fork-join ([`pam`]) |
//!
//! Queries are answered asynchronously by a pool of query workers
//! ([`query_processor`]) reading the version their query was issued at.
//!
//! ```rust
//! use contreap::{Engine, EngineConfig, Method, engine};
//!
//! let mut engine = engine::create(Method::Sequential, EngineConfig::new(2, 1, 16)?);
//! engine.init(&[5, 10, 15], 8)?;
//! engine.insert(10)?;
//! engine.query(10, 10)?;
//! let results = engine.close()?;
//! assert_eq!(results.sorted()[0].value, 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Logging
//!
//! With the `tracing` feature the crate emits `tracing` events (engine
//! commits at debug, scheduler hand-offs at trace). Without it the logging
//! macros compile to nothing.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ordering;
pub mod pam;
pub mod priority;
pub mod query_processor;
pub mod scheduler;
pub mod treap;
pub mod workload;

mod tracing_helpers;

pub use config::{EngineConfig, Method};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, WorkloadError};
pub use query_processor::{QueryAnswer, QueryResults};
pub use workload::{Transaction, Workload};

/// Install a console `tracing` subscriber filtered by `RUST_LOG`
/// (default `warn`).
///
/// Safe to call more than once; later calls do nothing.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_target(true)
        .compact()
        .try_init();
}

/// No-op without the `tracing` feature.
#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}
