//! Interchangeable engines behind one interface.
//!
//! Every engine numbers operations `1, 2, ...` in submission order, queries
//! included: a query takes a version of its own that observes the state left
//! by the operations before it. Version 0 is the initial tree.

use crate::config::{EngineConfig, Method};
use crate::error::EngineError;
use crate::query_processor::QueryResults;

pub mod batch;
pub mod pipelined;
pub mod root_chain;
pub mod sequential;

pub use batch::Batch;
pub use pipelined::Pipelined;
pub use root_chain::{ChainCursor, ChainEntry, RootChain};
pub use sequential::Sequential;

/// A versioned index accepting a stream of updates and queries.
pub trait Engine: Send {
    /// Method name, as spelled on the command line.
    fn name(&self) -> &'static str;

    /// Build version 0 from `keys` (duplicates counted) and reserve room for
    /// `capacity` subsequent operations. Starts the query workers.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyInitialized`] on a second call, or a failure to
    /// start threads.
    fn init(&mut self, keys: &[u64], capacity: usize) -> Result<(), EngineError>;

    /// Add one occurrence of `key`.
    ///
    /// # Errors
    ///
    /// Lifecycle misuse or [`EngineError::CapacityExceeded`].
    fn insert(&mut self, key: u64) -> Result<(), EngineError>;

    /// Remove one occurrence of `key`; a no-op when absent.
    ///
    /// # Errors
    ///
    /// Lifecycle misuse or [`EngineError::CapacityExceeded`].
    fn delete(&mut self, key: u64) -> Result<(), EngineError>;

    /// Enqueue a point lookup (`lo == hi`) or a range aggregate over
    /// `[lo, hi]`. Returns the query's 1-based sequence index.
    ///
    /// # Errors
    ///
    /// Lifecycle misuse or [`EngineError::CapacityExceeded`].
    fn query(&mut self, lo: u64, hi: u64) -> Result<usize, EngineError>;

    /// Flush buffered updates, stop every thread and return the answers.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotInitialized`] or [`EngineError::Closed`].
    fn close(&mut self) -> Result<QueryResults, EngineError>;

    /// Answer a query at `version` synchronously, the way a queued query
    /// would be answered. Versions past the last readable one read the last
    /// readable one; an uninitialized engine reads 0.
    ///
    /// After `close` every issued version is readable. On a running engine
    /// this may wait until `version` becomes readable.
    fn evaluate(&self, version: usize, lo: u64, hi: u64) -> u64;

    /// Number of versions issued so far.
    fn last_version(&self) -> usize;
}

/// Create the engine for `method`.
#[must_use]
pub fn create(method: Method, config: EngineConfig) -> Box<dyn Engine> {
    match method {
        Method::Sequential => Box::new(Sequential::new(config)),
        Method::Contreap => Box::new(Pipelined::new(config)),
        Method::Pam => Box::new(Batch::new(config)),
    }
}

/// The fork-join pool used for parallel build and batch merges.
pub(crate) fn fork_join_pool(threads: usize) -> Result<rayon::ThreadPool, EngineError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("contreap-fork-{i}"))
        .build()?)
}

/// Init/close bookkeeping shared by the engines.
#[derive(Debug)]
pub(crate) struct Lifecycle<T> {
    inner: Option<T>,
    closed: bool,
}

impl<T> Lifecycle<T> {
    pub(crate) const fn new() -> Self {
        Self {
            inner: None,
            closed: false,
        }
    }

    pub(crate) fn install(&mut self, value: T) -> Result<&mut T, EngineError> {
        if self.inner.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        Ok(self.inner.insert(value))
    }

    pub(crate) fn ensure_vacant(&self) -> Result<(), EngineError> {
        if self.inner.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        Ok(())
    }

    /// The running state, or why there is none.
    pub(crate) fn running(&mut self) -> Result<&mut T, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.inner.as_mut().ok_or(EngineError::NotInitialized)
    }

    /// Mark closed and hand out the state one last time.
    pub(crate) fn close(&mut self) -> Result<&mut T, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        let inner = self.inner.as_mut().ok_or(EngineError::NotInitialized)?;
        self.closed = true;
        Ok(inner)
    }

    /// The running state, if `close` has not taken it yet.
    pub(crate) fn unclosed(&mut self) -> Option<&mut T> {
        if self.closed {
            return None;
        }
        self.inner.as_mut()
    }

    /// The state, running or closed.
    pub(crate) const fn get(&self) -> Option<&T> {
        self.inner.as_ref()
    }
}
