//! Run configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::thread;

use crate::error::ConfigError;

/// Default batch size (also the pipelined engine's estimation block size).
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Which engine executes the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Method {
    /// Single-threaded path-copying reference backend.
    Sequential,
    /// Pipelined concurrent scheduler.
    Contreap,
    /// Batched persistent augmented map.
    Pam,
}

impl Method {
    /// All methods, in CLI order.
    pub const ALL: [Self; 3] = [Self::Contreap, Self::Sequential, Self::Pam];

    /// CLI spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Contreap => "contreap",
            Self::Pam => "pam",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownMethod(s.to_string()))
    }
}

/// Thread budget and batching shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Server-side threads (fork-join pool, or pipes + workers).
    pub threads: usize,
    /// Query worker threads.
    pub clients: usize,
    /// Batch size for `pam`, estimation block size for `contreap`.
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            clients: 1,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Build a validated config. A batch size of zero is coerced to 1.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroThreads`] if `threads` or `clients` is zero.
    pub fn new(threads: usize, clients: usize, batch_size: usize) -> Result<Self, ConfigError> {
        if threads == 0 {
            return Err(ConfigError::ZeroThreads { what: "threads" });
        }
        if clients == 0 {
            return Err(ConfigError::ZeroThreads { what: "clients" });
        }
        Ok(Self {
            threads,
            clients,
            batch_size: batch_size.max(1),
        })
    }

    /// Number of pipe threads the pipelined scheduler runs for `threads`.
    ///
    /// Half the budget below 16 threads, `ceil(2 * log2(threads))` above.
    #[must_use]
    pub fn pipe_threads(threads: usize) -> usize {
        if threads < 16 {
            return threads / 2;
        }
        // threads >= 16, so log2 >= 4 and the cast cannot truncate meaningfully
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pipes = (2.0 * (threads as f64).log2()).ceil() as usize;
        pipes
    }

    /// Number of worker threads: whatever the pipes leave, at least one.
    #[must_use]
    pub fn worker_threads(threads: usize) -> usize {
        threads.saturating_sub(Self::pipe_threads(threads)).max(1)
    }
}
