//! Error types.
//!
//! Lookups of absent keys and deletes of absent keys are not errors: both
//! are total operations over the key domain returning or storing a zero
//! count. The variants here cover configuration, workload decoding, and
//! engine lifecycle misuse.

use std::io;

use thiserror::Error;

/// Invalid run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The method name is not one of the supported engines.
    #[error("unknown method '{0}' (expected one of: sequential, contreap, pam)")]
    UnknownMethod(String),

    /// A thread budget of zero was requested.
    #[error("{what} must be at least 1")]
    ZeroThreads {
        /// Which budget was zero.
        what: &'static str,
    },
}

/// Failure while reading or writing a workload file.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Underlying I/O failure.
    #[error("workload I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The file ended before the declared number of keys or records.
    #[error("workload truncated: expected {expected} {what}, found {found}")]
    Truncated {
        /// What was being read.
        what: &'static str,
        /// Declared count.
        expected: u64,
        /// Count actually present.
        found: u64,
    },

    /// A transaction record carries a type byte other than 0, 1 or 2.
    ///
    /// Skipping the record would desynchronize result validation, so the
    /// whole load is rejected.
    #[error("unknown transaction type {tag} at record {index}")]
    UnknownTransaction {
        /// Zero-based record index.
        index: usize,
        /// The offending type byte.
        tag: u8,
    },
}

/// Engine lifecycle errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation was issued before `init`.
    #[error("engine used before init")]
    NotInitialized,

    /// `init` was called twice.
    #[error("engine already initialized")]
    AlreadyInitialized,

    /// An operation was issued after `close`.
    #[error("engine already closed")]
    Closed,

    /// More operations were issued than `init` reserved room for.
    #[error("operation capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// The capacity passed to `init`.
        capacity: usize,
    },

    /// The fork-join pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A scheduler or query thread could not be spawned.
    #[error("failed to spawn {role} thread: {source}")]
    Spawn {
        /// Thread role.
        role: &'static str,
        /// Underlying error.
        source: io::Error,
    },
}
