//! Pipelined concurrent scheduler for path-copying updates.
//!
//! Every operation becomes a task with its own version. The issuing thread
//! (the *master*) runs the first tree level of each task, then the task flows
//! through a chain of *pipe* threads that each build one more level, then to
//! a *worker* that finishes it. Tasks enter each pipe in version order, so
//! level `k` of version `i` is never built before level `k` of version
//! `i - 1`. That wavefront lets later tasks descend through nodes an earlier
//! task is still building.
//!
//! ```text
//!   master ──tokens[0]──> pipe 1 ──tokens[1]──> ... pipe N ──tokens[N]──> boarder
//!                                                                           │
//!                                                               submitted   │
//!                                                                           v
//!   collector <──stage── workers (claim ids with fetch_add, finish tasks)
//!       │
//!       └─> committed
//! ```
//!
//! ## Counters
//!
//! - `tokens[k]`: highest version pipe `k` has passed on (`tokens[0]` is the
//!   number of issued tasks). Monotonic, single writer.
//! - `submitted`: highest version a worker may pick up.
//! - `committed`: every version up to it is finished. Advanced by the
//!   collector over the contiguous prefix of finished tasks.
//! - `estimated[w]`: blocks of worker `w` whose roots are augmented.
//!
//! A worker whose dependency (the version of the node it is unwinding) is not
//! committed yet advances one level at a time, each only after the dependency
//! task has advanced further. Once the dependency commits, the rest runs with
//! the sequential algorithms.
//!
//! ## Reads
//!
//! Versions are grouped into blocks of `block_size`, striped round-robin
//! across workers. Once the whole block is committed its owner augments the
//! roots newest to oldest, so older roots reuse the aggregates of shared
//! subtrees. [`Snapshots::snapshot`] waits for the version's block.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread::{self, JoinHandle};

use crossbeam::utils::{Backoff, CachePadded};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ordering::{CLAIM, OBSERVE, PUBLISH};
use crate::tracing_helpers::{debug_log, trace_log, warn_log};
use crate::treap::{Link, augment};

mod context;


use context::Context;
pub use context::Operation;

// ============================================================================
//  Shared state
// ============================================================================

struct Shared {
    /// One context per version, index 0 holding the initial tree.
    contexts: Box<[Context]>,
    /// `tokens[k]` is the last version pipe `k` handed on.
    tokens: Box<[CachePadded<AtomicUsize>]>,
    /// Blocks each worker has augmented.
    estimated: Box<[CachePadded<AtomicUsize>]>,
    submitted: CachePadded<AtomicUsize>,
    fetched: CachePadded<AtomicUsize>,
    committed: CachePadded<AtomicUsize>,
    /// Number of tasks the run will have. Starts at the capacity and is
    /// lowered to the issued count on close.
    limit: CachePadded<AtomicUsize>,
    block_size: usize,
}

impl Shared {
    fn limit(&self) -> usize {
        self.limit.load(OBSERVE)
    }

    fn pipes(&self) -> usize {
        self.tokens.len() - 1
    }

    fn workers(&self) -> usize {
        self.estimated.len()
    }

    fn issued(&self) -> usize {
        self.tokens[0].load(OBSERVE)
    }

    // ------------------------------------------------------------------------
    //  Pipes
    // ------------------------------------------------------------------------

    fn run_pipe(&self, id: usize) {
        debug_log!(pipe = id, "pipe started");
        let mut pos = 1;
        while self.await_token(id - 1, pos) {
            let ctx = &self.contexts[pos];
            // SAFETY: tokens[id - 1] >= pos hands task `pos` to this pipe
            // until tokens[id] is published below.
            let state = unsafe { ctx.state() };
            if !state.is_done() {
                trace_log!(pipe = id, task = pos, "pipe step");
                state.step(&self.committed);
                ctx.settle(state);
            }
            self.tokens[id].store(pos, PUBLISH);
            pos += 1;
        }
        debug_log!(pipe = id, "pipe stopped");
    }

    /// Wait until `tokens[upstream]` covers `pos`. `false` once `pos` is
    /// past the end of the run.
    fn await_token(&self, upstream: usize, pos: usize) -> bool {
        let backoff = Backoff::new();
        loop {
            if self.tokens[upstream].load(OBSERVE) >= pos {
                return true;
            }
            if pos > self.limit() {
                return false;
            }
            backoff.snooze();
        }
    }

    // ------------------------------------------------------------------------
    //  Boarder
    // ------------------------------------------------------------------------

    fn run_boarder(&self) {
        debug_log!("boarder started");
        let last = self.pipes();
        let mut local = 0;
        let backoff = Backoff::new();
        loop {
            let produced = self.tokens[last].load(OBSERVE);
            if produced > local {
                local = produced;
                trace_log!(submitted = local, "boarder submits");
                self.submitted.store(local, PUBLISH);
                backoff.reset();
            } else if local >= self.limit() {
                break;
            } else {
                backoff.snooze();
            }
        }
        debug_log!("boarder stopped");
    }

    // ------------------------------------------------------------------------
    //  Workers
    // ------------------------------------------------------------------------

    fn run_worker(&self, id: usize) {
        debug_log!(worker = id, "worker started");
        let stride = self.workers() * self.block_size;
        let mut block_start = id * self.block_size + 1;
        let mut blocks = 0;
        let mut cached_submitted = 0;
        loop {
            let task = self.fetched.fetch_add(1, CLAIM) + 1;
            let claimed = self.await_submitted(task, &mut cached_submitted);
            if claimed {
                self.execute(task);
            }
            // augment every own block the claims have moved past
            while block_start <= self.limit() {
                let block_end = (block_start + self.block_size - 1).min(self.limit());
                if claimed && task < block_end {
                    break;
                }
                self.estimate(block_start, block_end);
                blocks += 1;
                self.estimated[id].store(blocks, PUBLISH);
                block_start += stride;
            }
            if !claimed {
                break;
            }
        }
        debug_log!(worker = id, blocks, "worker stopped");
    }

    /// Wait until `task` is submitted. `false` if it is past the end.
    fn await_submitted(&self, task: usize, cached: &mut usize) -> bool {
        let backoff = Backoff::new();
        while task > *cached {
            *cached = self.submitted.load(OBSERVE);
            if task <= *cached {
                break;
            }
            if task > self.limit() {
                return false;
            }
            backoff.snooze();
        }
        true
    }

    fn execute(&self, task: usize) {
        let ctx = &self.contexts[task];
        // SAFETY: `submitted >= task` hands the task to this worker, the only
        // claimant of `task`.
        let state = unsafe { ctx.state() };
        trace_log!(task, "worker resumes task");
        let mut stage = 1;
        while !state.is_done() {
            ctx.set_stage(stage);
            let dependency = state.dependency();
            if self.committed.load(OBSERVE) >= dependency {
                state.complete();
            } else {
                let upstream = &self.contexts[dependency];
                let backoff = Backoff::new();
                while upstream.stage() <= stage {
                    backoff.snooze();
                }
                state.step(&self.committed);
            }
            stage += 1;
        }
        ctx.settle(state);
        trace_log!(task, "worker completes task");
    }

    /// Augment the roots of versions `start..=end`, newest first, once they
    /// are committed. A close that lands meanwhile cuts the block short.
    fn estimate(&self, start: usize, end: usize) {
        let backoff = Backoff::new();
        let end = loop {
            let end = end.min(self.limit());
            if self.committed.load(OBSERVE) >= end {
                break end;
            }
            backoff.snooze();
        };
        for version in (start..=end).rev() {
            augment(self.contexts[version].root());
        }
        trace_log!(start, end, "block estimated");
    }

    // ------------------------------------------------------------------------
    //  Collector
    // ------------------------------------------------------------------------

    fn run_collector(&self) {
        debug_log!("collector started");
        let mut committed = 0;
        let backoff = Backoff::new();
        loop {
            let limit = self.limit();
            let mut next = committed;
            while next < limit && self.contexts[next + 1].is_done() {
                next += 1;
            }
            if next > committed {
                committed = next;
                trace_log!(committed, "collector commits");
                self.committed.store(committed, PUBLISH);
                backoff.reset();
            } else if committed >= limit {
                break;
            } else {
                backoff.snooze();
            }
        }
        debug_log!("collector stopped");
    }

    // ------------------------------------------------------------------------
    //  Reads
    // ------------------------------------------------------------------------

    fn snapshot(&self, version: usize) -> Option<&Link> {
        if version > self.issued() {
            return None;
        }
        if version == 0 {
            return Some(self.contexts[0].root());
        }
        let block = (version - 1) / self.block_size;
        let worker = block % self.workers();
        let position = block / self.workers();
        let backoff = Backoff::new();
        while self.estimated[worker].load(OBSERVE) <= position {
            backoff.snooze();
        }
        Some(self.contexts[version].root())
    }
}

// ============================================================================
//  Scheduler
// ============================================================================

/// The pipelined update engine.
///
/// Owned by the issuing thread. Readers get a [`Snapshots`] handle.
pub struct Scheduler {
    shared: Arc<Shared>,
    capacity: usize,
    issued: usize,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the scheduler threads for up to `capacity` tasks on top of the
    /// augmented initial tree `root`.
    ///
    /// `threads` is split between pipes and workers as in
    /// [`EngineConfig::pipe_threads`]; a boarder and a collector run on top.
    ///
    /// # Errors
    ///
    /// [`EngineError::Spawn`] if a thread cannot be started.
    pub fn new(threads: usize, capacity: usize, block_size: usize, root: Link) -> Result<Self, EngineError> {
        let pipes = EngineConfig::pipe_threads(threads);
        let workers = EngineConfig::worker_threads(threads);
        let contexts: Box<[Context]> = std::iter::once(Context::finished(root))
            .chain((0..capacity).map(|_| Context::new()))
            .collect();
        let counters = |n: usize| -> Box<[CachePadded<AtomicUsize>]> {
            (0..n).map(|_| CachePadded::new(AtomicUsize::new(0))).collect()
        };
        let shared = Arc::new(Shared {
            contexts,
            tokens: counters(pipes + 1),
            estimated: counters(workers),
            submitted: CachePadded::new(AtomicUsize::new(0)),
            fetched: CachePadded::new(AtomicUsize::new(0)),
            committed: CachePadded::new(AtomicUsize::new(0)),
            limit: CachePadded::new(AtomicUsize::new(capacity)),
            block_size: block_size.max(1),
        });
        debug_log!(pipes, workers, capacity, block_size, "starting scheduler");

        let mut scheduler = Self {
            shared,
            capacity,
            issued: 0,
            threads: Vec::with_capacity(pipes + workers + 2),
        };
        for id in 1..=pipes {
            scheduler.spawn("pipe", format!("contreap-pipe-{id}"), move |s| s.run_pipe(id))?;
        }
        scheduler.spawn("boarder", "contreap-boarder".to_string(), Shared::run_boarder)?;
        for id in 0..workers {
            scheduler.spawn("worker", format!("contreap-worker-{id}"), move |s| s.run_worker(id))?;
        }
        scheduler.spawn("collector", "contreap-collector".to_string(), Shared::run_collector)?;
        Ok(scheduler)
    }

    fn spawn<F>(&mut self, role: &'static str, name: String, body: F) -> Result<(), EngineError>
    where
        F: FnOnce(&Shared) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(&shared))
            .map_err(|source| EngineError::Spawn { role, source })?;
        self.threads.push(handle);
        Ok(())
    }

    fn issue(&mut self, op: Operation, key: u64) -> Result<usize, EngineError> {
        if self.threads.is_empty() {
            return Err(EngineError::Closed);
        }
        if self.issued == self.capacity {
            return Err(EngineError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let version = self.issued + 1;
        let shared = &*self.shared;
        let ctx = &shared.contexts[version];
        let previous = shared.contexts[version - 1].root();
        // SAFETY: nobody else sees task `version` before tokens[0] reaches it.
        let state = unsafe { ctx.state() };
        let root = state.start(op, key, version, previous, &shared.committed);
        ctx.set_root(root);
        ctx.settle(state);
        trace_log!(task = version, ?op, "master issues task");
        shared.tokens[0].store(version, PUBLISH);
        self.issued = version;
        Ok(version)
    }

    /// Issue an insert of `key`. Returns its version.
    ///
    /// # Errors
    ///
    /// [`EngineError::CapacityExceeded`] or [`EngineError::Closed`].
    pub fn insert(&mut self, key: u64) -> Result<usize, EngineError> {
        self.issue(Operation::Insert, key)
    }

    /// Issue a delete of `key`. Returns its version.
    ///
    /// # Errors
    ///
    /// [`EngineError::CapacityExceeded`] or [`EngineError::Closed`].
    pub fn delete(&mut self, key: u64) -> Result<usize, EngineError> {
        self.issue(Operation::Delete, key)
    }

    /// Issue a version that leaves the tree unchanged (a query's version).
    ///
    /// # Errors
    ///
    /// [`EngineError::CapacityExceeded`] or [`EngineError::Closed`].
    pub fn nop(&mut self) -> Result<usize, EngineError> {
        self.issue(Operation::None, 0)
    }

    /// Number of versions issued so far.
    #[must_use]
    pub const fn last_version(&self) -> usize {
        self.issued
    }

    /// Versions fully built so far.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.shared.committed.load(OBSERVE)
    }

    /// Read handle for query threads.
    #[must_use]
    pub fn snapshots(&self) -> Snapshots {
        Snapshots {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Seal the run at the issued count and wait for every thread to drain.
    ///
    /// Idempotent. Snapshots stay readable afterwards.
    pub fn close(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.limit.store(self.issued, PUBLISH);
        for handle in self.threads.drain(..) {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
        debug_log!(issued = self.issued, "scheduler drained");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !thread::panicking() && !self.threads.is_empty() {
            warn_log!(issued = self.issued, "scheduler dropped without close, draining");
            self.close();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("capacity", &self.capacity)
            .field("issued", &self.issued)
            .field("committed", &self.committed())
            .field("running", &!self.threads.is_empty())
            .finish()
    }
}

/// Shared read access to the scheduler's versions.
#[derive(Clone)]
pub struct Snapshots {
    shared: Arc<Shared>,
}

impl Snapshots {
    /// Fully augmented root of `version`, waiting until its block is
    /// estimated. `None` if the version has not been issued.
    #[must_use]
    pub fn snapshot(&self, version: usize) -> Option<&Link> {
        self.shared.snapshot(version)
    }

    /// Number of versions issued so far.
    #[must_use]
    pub fn last_version(&self) -> usize {
        self.shared.issued()
    }
}

impl std::fmt::Debug for Snapshots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshots")
            .field("issued", &self.last_version())
            .finish_non_exhaustive()
    }
}
