//! Batched persistent-augmented-map engine.
//!
//! Updates are buffered per operation type. A full buffer, or an update of
//! the other type, flushes the buffer as one batch on the fork-join pool:
//! the buffered keys become a transient delta tree that is merged into (or
//! subtracted from) the current root, and the result is appended to the
//! [`RootChain`]. Every node keeps its revision history, so one chain entry
//! answers queries for every version its batch covered.

use std::sync::Arc;
use std::thread;

use super::root_chain::{ChainCursor, RootChain};
use super::{Engine, Lifecycle, fork_join_pool};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pam::{self, Link};
use crate::query_processor::{QueryProcessor, QueryResults, Resolver};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Insert,
    Delete,
}

/// Navigates the root chain with one cursor per query worker.
pub struct BatchResolver {
    chain: Arc<RootChain>,
}

impl Resolver for BatchResolver {
    type Cursor = ChainCursor;

    fn cursor(&self) -> ChainCursor {
        ChainCursor::new()
    }

    fn point(&self, cursor: &mut ChainCursor, version: usize, key: u64) -> u64 {
        pam::find(&cursor.locate(&self.chain, version).root, version, key)
    }

    fn range(&self, cursor: &mut ChainCursor, version: usize, lo: u64, hi: u64) -> u64 {
        pam::range_aggregate(&cursor.locate(&self.chain, version).root, version, lo, hi)
    }
}

struct Running {
    pool: rayon::ThreadPool,
    chain: Arc<RootChain>,
    root: Link,
    batch_size: usize,
    buffer: Vec<(u64, usize)>,
    pending: Pending,
    capacity: usize,
    issued: usize,
    last_update: usize,
    processor: QueryProcessor<BatchResolver>,
}

impl Running {
    fn next_version(&mut self) -> Result<usize, EngineError> {
        if self.issued == self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.issued += 1;
        Ok(self.issued)
    }

    fn enqueue(&mut self, kind: Pending, key: u64) -> Result<(), EngineError> {
        if self.issued == self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        if kind != self.pending {
            self.flush()?;
            self.pending = kind;
        }
        let version = self.next_version()?;
        self.buffer.push((key, version));
        self.last_update = version;
        if self.buffer.len() == self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Apply the buffered batch and publish its root. No-op when empty.
    fn flush(&mut self) -> Result<(), EngineError> {
        let Some(&(_, version)) = self.buffer.last() else {
            return Ok(());
        };
        let (old, batch, pending) = (&self.root, &self.buffer, self.pending);
        let root = self.pool.install(|| match pending {
            Pending::Insert => pam::inserted(old, batch),
            Pending::Delete => pam::deleted(old, batch),
        });
        self.chain.push(version, root.clone())?;
        debug_log!(
            version,
            batch = self.buffer.len(),
            ?pending,
            size = root.as_ref().and_then(|node| node.summary()).map_or(0, |s| s.aggregate),
            "batch committed"
        );
        self.root = root;
        self.buffer.clear();
        Ok(())
    }
}

/// The `pam` method.
pub struct Batch {
    config: EngineConfig,
    state: Lifecycle<Running>,
}

impl Batch {
    /// An uninitialized engine.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Lifecycle::new(),
        }
    }
}

impl Engine for Batch {
    fn name(&self) -> &'static str {
        "pam"
    }

    fn init(&mut self, keys: &[u64], capacity: usize) -> Result<(), EngineError> {
        self.state.ensure_vacant()?;
        let pool = fork_join_pool(self.config.threads)?;
        let root = pool.install(|| pam::build_parallel(keys));
        // one entry for version 0, at most one per update after it
        let chain = Arc::new(RootChain::with_capacity(capacity + 1));
        chain.push(0, root.clone())?;
        let processor = QueryProcessor::start(
            self.config.clients,
            BatchResolver {
                chain: Arc::clone(&chain),
            },
        )?;
        debug_log!(keys = keys.len(), capacity, batch_size = self.config.batch_size, "pam engine ready");
        self.state.install(Running {
            pool,
            chain,
            root,
            batch_size: self.config.batch_size,
            buffer: Vec::with_capacity(self.config.batch_size),
            pending: Pending::Insert,
            capacity,
            issued: 0,
            last_update: 0,
            processor,
        })?;
        Ok(())
    }

    fn insert(&mut self, key: u64) -> Result<(), EngineError> {
        self.state.running()?.enqueue(Pending::Insert, key)
    }

    fn delete(&mut self, key: u64) -> Result<(), EngineError> {
        self.state.running()?.enqueue(Pending::Delete, key)
    }

    /// Queries read the state after the last submitted update; the batch
    /// holding that update may still be buffered, in which case the worker
    /// waits for its flush.
    fn query(&mut self, lo: u64, hi: u64) -> Result<usize, EngineError> {
        let running = self.state.running()?;
        let version = running.next_version()?;
        trace_log!(version, at = running.last_update, "query resolved at last update");
        running.processor.push(running.last_update, lo, hi)
    }

    fn close(&mut self) -> Result<QueryResults, EngineError> {
        let running = self.state.close()?;
        running.flush()?;
        let results = running.processor.stop();
        debug_log!(
            issued = running.issued,
            batches = running.chain.len() - 1,
            answered = results.len(),
            "pam engine closed"
        );
        Ok(results)
    }

    /// Versions past the last flushed batch read the last flushed batch.
    fn evaluate(&self, version: usize, lo: u64, hi: u64) -> u64 {
        let Some(running) = self.state.get() else {
            return 0;
        };
        let Some(last) = running.chain.last() else {
            return 0;
        };
        let version = version.min(last.version);
        let mut cursor = ChainCursor::new();
        running.processor.resolver().resolve(&mut cursor, version, lo, hi)
    }

    fn last_version(&self) -> usize {
        self.state.get().map_or(0, |running| running.issued)
    }
}

impl Drop for Batch {
    /// Queued queries can wait on the buffered batch, so it is flushed
    /// before the query workers are joined.
    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        if let Some(running) = self.state.unclosed() {
            warn_log!(issued = running.issued, "pam engine dropped without close, flushing");
            if let Err(error) = running.flush() {
                warn_log!(%error, "flush on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("config", &self.config)
            .field("last_version", &self.last_version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(batch_size: usize) -> Batch {
        let mut engine = Batch::new(EngineConfig::new(2, 2, batch_size).unwrap());
        engine.init(&[5, 10, 15], 32).unwrap();
        engine
    }

    #[test]
    fn example_scenario() {
        let mut engine = engine(4);
        assert_eq!(engine.evaluate(0, 0, 20), 3);
        engine.insert(10).unwrap();
        engine.delete(5).unwrap();
        engine.close().unwrap();
        assert_eq!(engine.evaluate(1, 10, 10), 2);
        assert_eq!(engine.evaluate(1, 0, 20), 4);
        assert_eq!(engine.evaluate(2, 5, 5), 0);
        assert_eq!(engine.evaluate(2, 0, 20), 3);
        assert_eq!(engine.evaluate(1, 6, 20), 3);
    }

    #[test]
    fn versions_inside_one_batch_stay_distinct() {
        let mut engine = engine(100);
        for key in [1, 1, 2, 1] {
            engine.insert(key).unwrap();
        }
        engine.close().unwrap();
        let ones: Vec<u64> = (0..=4).map(|v| engine.evaluate(v, 1, 1)).collect();
        assert_eq!(ones, [0, 1, 2, 2, 3]);
        assert_eq!(engine.evaluate(3, 0, 100), 6);
    }

    #[test]
    fn queries_read_the_last_update() {
        let mut engine = engine(2);
        assert_eq!(engine.query(0, 100).unwrap(), 1);
        engine.insert(7).unwrap();
        engine.insert(8).unwrap();
        engine.insert(9).unwrap();
        assert_eq!(engine.query(0, 100).unwrap(), 2);
        engine.delete(7).unwrap();
        assert_eq!(engine.query(7, 7).unwrap(), 3);
        assert_eq!(engine.last_version(), 7);
        let answers: Vec<u64> = engine.close().unwrap().sorted().iter().map(|a| a.value).collect();
        assert_eq!(answers, [3, 6, 0]);
    }

    #[test]
    fn drop_without_close_flushes_for_waiting_queries() {
        let (done, finished) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            let mut engine = engine(8);
            engine.insert(4).unwrap();
            engine.query(0, 10).unwrap();
            drop(engine);
            done.send(()).unwrap();
        });
        finished
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("dropping an unclosed engine returned");
        handle.join().unwrap();
    }

    #[test]
    fn capacity_counts_queries() {
        let mut engine = Batch::new(EngineConfig::new(1, 1, 8).unwrap());
        engine.init(&[], 2).unwrap();
        engine.insert(1).unwrap();
        engine.query(1, 1).unwrap();
        assert!(matches!(
            engine.delete(1),
            Err(EngineError::CapacityExceeded { capacity: 2 })
        ));
        let results = engine.close().unwrap();
        assert_eq!(results.sorted()[0].value, 1);
        assert!(matches!(engine.close(), Err(EngineError::Closed)));
    }
}
