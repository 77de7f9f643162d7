//! Persistent treap with per-version nodes.
//!
//! Every update produces a new root by copying only the nodes on the path to
//! the modified key; everything else is shared (`Arc`) with prior versions.
//! A node's value is the occurrence count of its key, and the cached
//! aggregate is the sum of counts in its subtree.
//!
//! ## Node lifecycle
//!
//! A node is *under construction* until both child cells are set and
//! *published* afterwards. Child cells are set-once: the creating task is the
//! only writer, and a reader that reaches a node still under construction
//! waits in [`Node::left`] / [`Node::right`] until the producer sets the cell.
//! Published nodes are immutable apart from the one-time population of the
//! aggregate.

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, OnceLock};

use crossbeam::utils::Backoff;

use crate::ordering::AGGREGATE;
use crate::priority::{self, Rank};

pub mod augment;
pub mod build;
pub mod path_copy;
pub mod query;

pub use augment::{augment, augment_parallel};
pub use build::{build, build_parallel, merge, split};
pub use path_copy::{concat, deploy, search_delete, search_insert, split_copy};
pub use query::{find, range_aggregate, value_of};

/// A (possibly empty) subtree.
pub type Link = Option<Arc<Node>>;

/// Aggregate value meaning "not computed yet". Counts are at least 1, so a
/// computed aggregate of a non-empty subtree is never zero.
pub const AGGREGATE_UNSET: u64 = 0;

/// A treap node owned by one version.
pub struct Node {
    key: u64,
    priority: u64,
    value: u64,
    version: usize,
    aggregate: AtomicU64,
    left: OnceLock<Link>,
    right: OnceLock<Link>,
}

impl Node {
    /// New leaf for `key` with count 1, deriving its priority.
    #[must_use]
    pub fn new(version: usize, key: u64) -> Self {
        Self::with_priority(version, priority::priority(key), key)
    }

    /// New leaf for `key` with a precomputed priority.
    #[must_use]
    pub const fn with_priority(version: usize, priority: u64, key: u64) -> Self {
        Self {
            key,
            priority,
            value: 1,
            version,
            aggregate: AtomicU64::new(AGGREGATE_UNSET),
            left: OnceLock::new(),
            right: OnceLock::new(),
        }
    }

    /// Shallow copy stamped with `version`: same key, priority and count,
    /// no children, no aggregate.
    #[must_use]
    pub fn weak_copy(&self, version: usize) -> Self {
        Self::with_priority(version, self.priority, self.key).with_value(self.value)
    }

    /// Replace the count (construction only).
    #[must_use]
    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    /// Set both children at construction, publishing the node.
    #[must_use]
    pub fn with_children(self, left: Link, right: Link) -> Self {
        self.set_left(left);
        self.set_right(right);
        self
    }

    /// The key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> u64 {
        self.key
    }

    /// The priority.
    #[inline]
    #[must_use]
    pub const fn priority(&self) -> u64 {
        self.priority
    }

    /// Heap rank (priority, key).
    #[inline]
    #[must_use]
    pub const fn rank(&self) -> Rank {
        priority::rank(self.priority, self.key)
    }

    /// Occurrence count.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Version that created this node.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> usize {
        self.version
    }

    /// Cached subtree aggregate, if computed.
    #[inline]
    #[must_use]
    pub fn aggregate(&self) -> Option<u64> {
        match self.aggregate.load(AGGREGATE) {
            AGGREGATE_UNSET => None,
            sum => Some(sum),
        }
    }

    /// Store the subtree aggregate. Concurrent callers store the same value.
    #[inline]
    pub(crate) fn set_aggregate(&self, sum: u64) {
        self.aggregate.store(sum, AGGREGATE);
    }

    /// Left child, waiting for the producer if it is not set yet.
    #[inline]
    #[must_use]
    pub fn left(&self) -> &Link {
        settled(&self.left)
    }

    /// Right child, waiting for the producer if it is not set yet.
    #[inline]
    #[must_use]
    pub fn right(&self) -> &Link {
        settled(&self.right)
    }

    /// Left child if already set.
    #[inline]
    #[must_use]
    pub fn try_left(&self) -> Option<&Link> {
        self.left.get()
    }

    /// Right child if already set.
    #[inline]
    #[must_use]
    pub fn try_right(&self) -> Option<&Link> {
        self.right.get()
    }

    /// Whether both children are set.
    #[inline]
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.left.get().is_some() && self.right.get().is_some()
    }

    /// Set the left child. Panics if it was already set.
    #[inline]
    pub(crate) fn set_left(&self, link: Link) {
        set_once(&self.left, link);
    }

    /// Set the right child. Panics if it was already set.
    #[inline]
    pub(crate) fn set_right(&self, link: Link) {
        set_once(&self.right, link);
    }

    /// Detach both children of an unpublished node for in-place rebuilding.
    pub(crate) fn take_children(&mut self) -> (Link, Link) {
        (
            self.left.take().flatten(),
            self.right.take().flatten(),
        )
    }

    /// Add to the count of an unpublished node.
    pub(crate) fn add_value(&mut self, value: u64) {
        self.value += value;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("version", &self.version)
            .field("aggregate", &self.aggregate())
            .field("published", &self.is_published())
            .finish_non_exhaustive()
    }
}

/// Publish `link` into a set-once cell.
///
/// A second write means two tasks believe they own the same node, which is a
/// scheduler bug.
#[inline]
pub(crate) fn set_once(cell: &OnceLock<Link>, link: Link) {
    if cell.set(link).is_err() {
        unreachable!("child link written twice");
    }
}

/// Read a set-once cell, spinning until its producer has written it.
#[inline]
pub(crate) fn settled(cell: &OnceLock<Link>) -> &Link {
    if let Some(link) = cell.get() {
        return link;
    }
    let backoff = Backoff::new();
    loop {
        if let Some(link) = cell.get() {
            return link;
        }
        backoff.snooze();
    }
}

/// Mutable access to a node that has not been shared yet.
///
/// Build and merge only ever touch freshly allocated nodes; a shared node
/// here means a published snapshot would be mutated.
#[inline]
pub(crate) fn unshared(node: &mut Arc<Node>) -> &mut Node {
    Arc::get_mut(node).unwrap_or_else(|| unreachable!("mutating a shared treap node"))
}

/// Number of nodes in the tree rooted at `link`.
#[must_use]
pub fn len(link: &Link) -> usize {
    link.as_ref()
        .map_or(0, |node| 1 + len(node.left()) + len(node.right()))
}

/// In-order `(key, count)` pairs of a published tree.
#[must_use]
pub fn entries(link: &Link) -> Vec<(u64, u64)> {
    fn walk(link: &Link, out: &mut Vec<(u64, u64)>) {
        if let Some(node) = link {
            walk(node.left(), out);
            out.push((node.key(), node.value()));
            walk(node.right(), out);
        }
    }
    let mut out = Vec::new();
    walk(link, &mut out);
    out
}

/// Check BST order, heap order, and cached aggregates of a published tree.
///
/// Returns a description of the first violation.
///
/// # Errors
///
/// A human-readable description of the violated invariant.
pub fn check_invariants(link: &Link) -> Result<(), String> {
    fn walk(link: &Link, lo: Option<u64>, hi: Option<u64>, parent: Option<Rank>) -> Result<u64, String> {
        let Some(node) = link else { return Ok(0) };
        let key = node.key();
        if lo.is_some_and(|lo| key <= lo) || hi.is_some_and(|hi| key >= hi) {
            return Err(format!("key {key} out of order"));
        }
        if parent.is_some_and(|p| node.rank() > p) {
            return Err(format!("key {key} violates heap order"));
        }
        if node.value() == 0 {
            return Err(format!("key {key} has zero count"));
        }
        let sum = walk(node.left(), lo, Some(key), Some(node.rank()))?
            + node.value()
            + walk(node.right(), Some(key), hi, Some(node.rank()))?;
        match node.aggregate() {
            Some(cached) if cached != sum => {
                Err(format!("key {key} caches {cached}, subtree sums to {sum}"))
            }
            _ => Ok(sum),
        }
    }
    walk(link, None, None, None).map(|_| ())
}
