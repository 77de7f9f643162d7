//! The `contreap` method: pipelined concurrent path copying.
//!
//! A thin adapter over [`Scheduler`]: the issuing thread hands every
//! operation, queries included, to the scheduler as a task and query workers
//! read the augmented snapshots it publishes.

use super::{Engine, Lifecycle, fork_join_pool};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::query_processor::{QueryProcessor, QueryResults, Resolver};
use crate::scheduler::{Scheduler, Snapshots};
use crate::tracing_helpers::debug_log;
use crate::treap::{self, Link};

/// Reads scheduler snapshots; a query waits until its version's block is
/// augmented.
pub struct SnapshotResolver {
    snapshots: Snapshots,
}

impl SnapshotResolver {
    fn root(&self, version: usize) -> &Link {
        self.snapshots
            .snapshot(version)
            .unwrap_or_else(|| unreachable!("query at unissued version {version}"))
    }
}

impl Resolver for SnapshotResolver {
    type Cursor = ();

    fn cursor(&self) {}

    fn point(&self, _: &mut (), version: usize, key: u64) -> u64 {
        treap::value_of(self.root(version), key)
    }

    fn range(&self, _: &mut (), version: usize, lo: u64, hi: u64) -> u64 {
        treap::range_aggregate(self.root(version), lo, hi)
    }
}

// Field order matters on drop: the scheduler drains its tasks before the
// query workers, which may wait on them, are joined.
struct Running {
    scheduler: Scheduler,
    processor: QueryProcessor<SnapshotResolver>,
}

/// The `contreap` method.
pub struct Pipelined {
    config: EngineConfig,
    state: Lifecycle<Running>,
}

impl Pipelined {
    /// An uninitialized engine.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Lifecycle::new(),
        }
    }
}

impl Engine for Pipelined {
    fn name(&self) -> &'static str {
        "contreap"
    }

    fn init(&mut self, keys: &[u64], capacity: usize) -> Result<(), EngineError> {
        self.state.ensure_vacant()?;
        let root = fork_join_pool(self.config.threads)?.install(|| treap::build_parallel(keys));
        let scheduler = Scheduler::new(self.config.threads, capacity, self.config.batch_size, root)?;
        let processor = QueryProcessor::start(
            self.config.clients,
            SnapshotResolver {
                snapshots: scheduler.snapshots(),
            },
        )?;
        debug_log!(keys = keys.len(), capacity, "contreap engine ready");
        self.state.install(Running { scheduler, processor })?;
        Ok(())
    }

    fn insert(&mut self, key: u64) -> Result<(), EngineError> {
        self.state.running()?.scheduler.insert(key)?;
        Ok(())
    }

    fn delete(&mut self, key: u64) -> Result<(), EngineError> {
        self.state.running()?.scheduler.delete(key)?;
        Ok(())
    }

    fn query(&mut self, lo: u64, hi: u64) -> Result<usize, EngineError> {
        let running = self.state.running()?;
        let version = running.scheduler.nop()?;
        running.processor.push(version, lo, hi)
    }

    /// Drains the scheduler first: its close seals the last partial block,
    /// which lets the query workers finish.
    fn close(&mut self) -> Result<QueryResults, EngineError> {
        let running = self.state.close()?;
        running.scheduler.close();
        let results = running.processor.stop();
        debug_log!(
            issued = running.scheduler.last_version(),
            answered = results.len(),
            "contreap engine closed"
        );
        Ok(results)
    }

    /// Before close, a version in a block that has not filled up yet only
    /// becomes readable once the block completes.
    fn evaluate(&self, version: usize, lo: u64, hi: u64) -> u64 {
        let Some(running) = self.state.get() else {
            return 0;
        };
        let version = version.min(running.scheduler.last_version());
        running.processor.resolver().resolve(&mut (), version, lo, hi)
    }

    fn last_version(&self) -> usize {
        self.state.get().map_or(0, |running| running.scheduler.last_version())
    }
}

impl std::fmt::Debug for Pipelined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipelined")
            .field("config", &self.config)
            .field("last_version", &self.last_version())
            .finish()
    }
}
