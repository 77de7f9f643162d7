//! Single-threaded path-copying reference engine.
//!
//! The issuing thread applies each update directly with
//! [`search_insert`](crate::treap::search_insert) /
//! [`search_delete`](crate::treap::search_delete) and augments the copied
//! path before publishing the root. Only version 0 is built on the
//! fork-join pool. Every other engine is checked against this one.

use std::sync::{Arc, OnceLock};

use crossbeam::utils::Backoff;

use super::{Engine, Lifecycle, fork_join_pool};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::priority::priority;
use crate::query_processor::{QueryProcessor, QueryResults, Resolver};
use crate::tracing_helpers::debug_log;
use crate::treap::{self, Link};

/// Published roots, one set-once slot per version.
struct Roots {
    slots: Box<[OnceLock<Link>]>,
}

impl Roots {
    fn new(capacity: usize, root: Link) -> Self {
        let slots: Box<[OnceLock<Link>]> = (0..=capacity).map(|_| OnceLock::new()).collect();
        if slots[0].set(root).is_err() {
            unreachable!("fresh root slot already set");
        }
        Self { slots }
    }

    fn publish(&self, version: usize, root: Link) {
        if self.slots[version].set(root).is_err() {
            unreachable!("version {version} published twice");
        }
    }

    /// Root of `version`, waiting for the issuing thread to publish it.
    fn root(&self, version: usize) -> &Link {
        let slot = &self.slots[version];
        let backoff = Backoff::new();
        loop {
            if let Some(root) = slot.get() {
                return root;
            }
            backoff.snooze();
        }
    }
}

/// Reads published roots directly; needs no per-worker state.
pub struct SequentialResolver {
    roots: Arc<Roots>,
}

impl Resolver for SequentialResolver {
    type Cursor = ();

    fn cursor(&self) {}

    fn point(&self, _: &mut (), version: usize, key: u64) -> u64 {
        treap::value_of(self.roots.root(version), key)
    }

    fn range(&self, _: &mut (), version: usize, lo: u64, hi: u64) -> u64 {
        treap::range_aggregate(self.roots.root(version), lo, hi)
    }
}

struct Running {
    roots: Arc<Roots>,
    capacity: usize,
    issued: usize,
    processor: QueryProcessor<SequentialResolver>,
}

impl Running {
    fn next_version(&self) -> Result<usize, EngineError> {
        if self.issued == self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(self.issued + 1)
    }

    fn apply(&mut self, update: impl FnOnce(usize, &Link) -> Link) -> Result<usize, EngineError> {
        let version = self.next_version()?;
        let root = update(version, self.roots.root(version - 1));
        treap::augment(&root);
        self.roots.publish(version, root);
        self.issued = version;
        Ok(version)
    }
}

/// The `sequential` method.
pub struct Sequential {
    config: EngineConfig,
    state: Lifecycle<Running>,
}

impl Sequential {
    /// An uninitialized engine.
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: Lifecycle::new(),
        }
    }
}

impl Engine for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn init(&mut self, keys: &[u64], capacity: usize) -> Result<(), EngineError> {
        self.state.ensure_vacant()?;
        let root = fork_join_pool(self.config.threads)?.install(|| treap::build_parallel(keys));
        let roots = Arc::new(Roots::new(capacity, root));
        let processor = QueryProcessor::start(
            self.config.clients,
            SequentialResolver {
                roots: Arc::clone(&roots),
            },
        )?;
        debug_log!(keys = keys.len(), capacity, "sequential engine ready");
        self.state.install(Running {
            roots,
            capacity,
            issued: 0,
            processor,
        })?;
        Ok(())
    }

    fn insert(&mut self, key: u64) -> Result<(), EngineError> {
        let priority = priority(key);
        self.state
            .running()?
            .apply(|version, past| treap::search_insert(version, past, priority, key))?;
        Ok(())
    }

    fn delete(&mut self, key: u64) -> Result<(), EngineError> {
        let priority = priority(key);
        self.state
            .running()?
            .apply(|version, past| treap::search_delete(version, past, priority, key))?;
        Ok(())
    }

    fn query(&mut self, lo: u64, hi: u64) -> Result<usize, EngineError> {
        let running = self.state.running()?;
        let version = running.apply(|_, past| past.clone())?;
        running.processor.push(version, lo, hi)
    }

    fn close(&mut self) -> Result<QueryResults, EngineError> {
        let running = self.state.close()?;
        let results = running.processor.stop();
        debug_log!(issued = running.issued, answered = results.len(), "sequential engine closed");
        Ok(results)
    }

    fn evaluate(&self, version: usize, lo: u64, hi: u64) -> u64 {
        let Some(running) = self.state.get() else {
            return 0;
        };
        let resolver = running.processor.resolver();
        resolver.resolve(&mut (), version.min(running.issued), lo, hi)
    }

    fn last_version(&self) -> usize {
        self.state.get().map_or(0, |running| running.issued)
    }
}

impl std::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequential")
            .field("config", &self.config)
            .field("last_version", &self.last_version())
            .finish()
    }
}
