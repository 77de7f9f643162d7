//! Query worker pool.
//!
//! Queries are answered asynchronously: the issuing thread pushes
//! `(version, lo, hi)` onto a lock-free queue and a pool of workers resolves
//! them against the engine's snapshots. Each worker keeps its own answer
//! list, so answers are ordered per worker but not across workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::thread::{self, JoinHandle};

use crossbeam::queue::SegQueue;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::ordering::{CLAIM, RUN_FLAG};
use crate::tracing_helpers::{debug_log, trace_log};

/// Answers queries against an engine's versions.
pub trait Resolver: Send + Sync + 'static {
    /// Per-worker navigation state, reused across that worker's queries.
    type Cursor;

    /// A fresh cursor for a new worker.
    fn cursor(&self) -> Self::Cursor;

    /// Count of `key` at `version`.
    fn point(&self, cursor: &mut Self::Cursor, version: usize, key: u64) -> u64;

    /// Sum of counts over `[lo, hi]` at `version`.
    fn range(&self, cursor: &mut Self::Cursor, version: usize, lo: u64, hi: u64) -> u64;

    /// Point lookup when `lo == hi`, range aggregate otherwise.
    fn resolve(&self, cursor: &mut Self::Cursor, version: usize, lo: u64, hi: u64) -> u64 {
        if lo == hi {
            self.point(cursor, version, lo)
        } else {
            self.range(cursor, version, lo, hi)
        }
    }
}

/// One answered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryAnswer {
    /// 1-based submission index returned by `push`.
    pub index: usize,
    /// The resolved count.
    pub value: u64,
}

/// Answers collected by every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResults {
    /// One list per worker, in the order that worker resolved them.
    pub per_worker: Vec<Vec<QueryAnswer>>,
}

impl QueryResults {
    /// Total number of answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.per_worker.iter().map(Vec::len).sum()
    }

    /// Whether no query was answered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_worker.iter().all(Vec::is_empty)
    }

    /// Every answer ordered by submission index.
    #[must_use]
    pub fn sorted(&self) -> Vec<QueryAnswer> {
        let mut all: Vec<QueryAnswer> = self.per_worker.iter().flatten().copied().collect();
        all.sort_unstable_by_key(|answer| answer.index);
        all
    }
}

#[derive(Debug, Clone, Copy)]
struct Request {
    index: usize,
    version: usize,
    lo: u64,
    hi: u64,
}

/// A pool of query workers sharing one request queue.
pub struct QueryProcessor<R: Resolver> {
    queue: Arc<SegQueue<Request>>,
    running: Arc<AtomicBool>,
    pushed: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<Vec<QueryAnswer>>>>,
    resolver: Arc<R>,
}

impl<R: Resolver> QueryProcessor<R> {
    /// Start `clients` workers resolving through `resolver`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Spawn`] if a worker cannot be started.
    pub fn start(clients: usize, resolver: R) -> Result<Self, EngineError> {
        let processor = Self {
            queue: Arc::new(SegQueue::new()),
            running: Arc::new(AtomicBool::new(true)),
            pushed: AtomicUsize::new(0),
            workers: Mutex::new(Vec::with_capacity(clients)),
            resolver: Arc::new(resolver),
        };
        for id in 0..clients.max(1) {
            let queue = Arc::clone(&processor.queue);
            let running = Arc::clone(&processor.running);
            let resolver = Arc::clone(&processor.resolver);
            let handle = thread::Builder::new()
                .name(format!("contreap-query-{id}"))
                .spawn(move || serve(id, &*resolver, &queue, &running))
                .map_err(|source| EngineError::Spawn {
                    role: "query",
                    source,
                })?;
            processor.workers.lock().push(handle);
        }
        debug_log!(clients, "query processor started");
        Ok(processor)
    }

    /// The resolver the workers use.
    #[must_use]
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Enqueue a query at `version`. Returns its 1-based index.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] after [`stop`](Self::stop).
    pub fn push(&self, version: usize, lo: u64, hi: u64) -> Result<usize, EngineError> {
        if !self.running.load(RUN_FLAG) {
            return Err(EngineError::Closed);
        }
        let index = self.pushed.fetch_add(1, CLAIM) + 1;
        self.queue.push(Request {
            index,
            version,
            lo,
            hi,
        });
        Ok(index)
    }

    /// Number of queries pushed so far.
    #[must_use]
    pub fn pushed(&self) -> usize {
        self.pushed.load(CLAIM)
    }

    /// Let the workers drain the queue, join them and collect the answers.
    ///
    /// A second call returns empty results.
    pub fn stop(&self) -> QueryResults {
        self.running.store(false, RUN_FLAG);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let per_worker = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect();
        debug_log!(pushed = self.pushed(), "query processor stopped");
        QueryResults { per_worker }
    }
}

impl<R: Resolver> Drop for QueryProcessor<R> {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.stop();
        }
    }
}

impl<R: Resolver> std::fmt::Debug for QueryProcessor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProcessor")
            .field("pushed", &self.pushed())
            .field("queued", &self.queue.len())
            .field("running", &self.running.load(RUN_FLAG))
            .finish_non_exhaustive()
    }
}

#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn serve<R: Resolver>(
    id: usize,
    resolver: &R,
    queue: &SegQueue<Request>,
    running: &AtomicBool,
) -> Vec<QueryAnswer> {
    trace_log!(client = id, "query worker started");
    let mut cursor = resolver.cursor();
    let mut answers = Vec::new();
    let backoff = Backoff::new();
    loop {
        if let Some(request) = queue.pop() {
            let value = resolver.resolve(&mut cursor, request.version, request.lo, request.hi);
            trace_log!(
                client = id,
                index = request.index,
                version = request.version,
                value,
                "query answered"
            );
            answers.push(QueryAnswer {
                index: request.index,
                value,
            });
            backoff.reset();
        } else if !running.load(RUN_FLAG) && queue.is_empty() {
            break;
        } else {
            backoff.snooze();
        }
    }
    trace_log!(client = id, answered = answers.len(), "query worker stopped");
    answers
}
