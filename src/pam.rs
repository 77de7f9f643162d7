//! Persistent augmented map with per-key value histories.
//!
//! The batched engine merges a whole batch of keys into the tree in one
//! parallel pass instead of one path copy per key. Each node records how its
//! count evolved as a list of [`Revision`]s, so a single tree answers every
//! version a batch covered.
//!
//! ## Transient vs persistent
//!
//! A node without a [`Summary`] is *transient*: it was built for the batch in
//! flight, nothing else references it, and the merge algorithms consume it in
//! place. Augmentation attaches the summary and makes the node *persistent*;
//! from then on it is shared with later versions and is only ever copied.

use std::fmt;
use std::sync::Arc;

use crate::priority::{self, Rank};

pub mod augment;
pub mod build;
pub mod copy_merge;
pub mod copy_subtract;
pub mod query;

pub use augment::augment_parallel;
pub use build::{build, build_parallel, build_versioned, merge, merge_versioned, split};
pub use copy_merge::{copy_merge, copy_split, inserted};
pub use copy_subtract::{copy_concat, copy_prune, copy_subtract, deleted};
pub use query::{find, range_aggregate};

/// A (possibly empty) subtree.
pub type Link = Option<Arc<HistoryNode>>;

/// The count of a key as of `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    /// Occurrence count.
    pub value: u64,
    /// First version at which `value` holds.
    pub version: usize,
}

/// Cached subtree summary of a persistent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Sum of latest counts in the subtree.
    pub aggregate: u64,
    /// Greatest revision version in the subtree. The aggregate answers
    /// queries at any version at or above it.
    pub watermark: usize,
    /// Nodes in the subtree whose latest count is zero.
    pub tombstones: usize,
}

/// A treap node carrying the revision history of its key.
pub struct HistoryNode {
    key: u64,
    priority: u64,
    revisions: Vec<Revision>,
    summary: Option<Summary>,
    pub(crate) left: Link,
    pub(crate) right: Link,
}

impl HistoryNode {
    /// Transient leaf for `key` with count 1 at `version`.
    #[must_use]
    pub fn new(version: usize, key: u64) -> Self {
        Self::with_revisions(
            priority::priority(key),
            key,
            vec![Revision { value: 1, version }],
        )
    }

    /// Transient leaf with an explicit history. `revisions` must be
    /// non-empty and ordered by version.
    #[must_use]
    pub fn with_revisions(priority: u64, key: u64, revisions: Vec<Revision>) -> Self {
        debug_assert!(!revisions.is_empty());
        debug_assert!(revisions.is_sorted_by_key(|r| r.version));
        Self {
            key,
            priority,
            revisions,
            summary: None,
            left: None,
            right: None,
        }
    }

    /// Transient copy carrying only the latest revision.
    #[must_use]
    pub fn weak_copy(&self) -> Self {
        Self::with_revisions(self.priority, self.key, vec![self.latest()])
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

    /// Revision history, oldest first.
    #[inline]
    #[must_use]
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Most recent revision.
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Revision {
        // never empty: every constructor installs at least one revision
        self.revisions[self.revisions.len() - 1]
    }

    /// Count as of `version`: the greatest revision at or below it, else 0.
    #[must_use]
    pub fn value_at(&self, version: usize) -> u64 {
        match self.revisions.partition_point(|r| r.version <= version) {
            0 => 0,
            n => self.revisions[n - 1].value,
        }
    }

    /// Subtree summary; `None` while transient.
    #[inline]
    #[must_use]
    pub const fn summary(&self) -> Option<Summary> {
        self.summary
    }

    /// Whether the node is shared with published versions.
    #[inline]
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.summary.is_some()
    }

    /// Left child.
    #[inline]
    #[must_use]
    pub const fn left(&self) -> &Link {
        &self.left
    }

    /// Right child.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> &Link {
        &self.right
    }

    pub(crate) fn set_summary(&mut self, summary: Summary) {
        self.summary = Some(summary);
    }

    pub(crate) fn revisions_mut(&mut self) -> &mut Vec<Revision> {
        &mut self.revisions
    }

    pub(crate) fn take_children(&mut self) -> (Link, Link) {
        (self.left.take(), self.right.take())
    }

    pub(crate) fn with_children(mut self, left: Link, right: Link) -> Self {
        self.left = left;
        self.right = right;
        self
    }
}

impl fmt::Debug for HistoryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryNode")
            .field("key", &self.key)
            .field("revisions", &self.revisions)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

/// Mutable access to a transient node.
#[inline]
pub(crate) fn unshared(node: &mut Arc<HistoryNode>) -> &mut HistoryNode {
    debug_assert!(!node.is_persistent(), "mutating a persistent node");
    Arc::get_mut(node).unwrap_or_else(|| unreachable!("mutating a shared history node"))
}

/// Split a subtree root into its children and an owned node to rebuild.
///
/// A transient root is taken apart in place; a persistent one is
/// weak-copied and its children shared.
pub(crate) fn expose(node: Arc<HistoryNode>) -> (Link, HistoryNode, Link) {
    if node.is_persistent() {
        return (node.left.clone(), node.weak_copy(), node.right.clone());
    }
    match Arc::try_unwrap(node) {
        Ok(mut owned) => {
            let (left, right) = owned.take_children();
            (left, owned, right)
        }
        Err(_) => unreachable!("transient history node is shared"),
    }
}

/// In-order `(key, latest value)` pairs.
#[must_use]
pub fn entries(link: &Link) -> Vec<(u64, u64)> {
    fn walk(link: &Link, out: &mut Vec<(u64, u64)>) {
        if let Some(node) = link {
            walk(&node.left, out);
            out.push((node.key, node.latest().value));
            walk(&node.right, out);
        }
    }
    let mut out = Vec::new();
    walk(link, &mut out);
    out
}

/// In-order `(key, value_at(version))` pairs with zero counts skipped.
#[must_use]
pub fn entries_at(link: &Link, version: usize) -> Vec<(u64, u64)> {
    fn walk(link: &Link, version: usize, out: &mut Vec<(u64, u64)>) {
        if let Some(node) = link {
            walk(&node.left, version, out);
            let value = node.value_at(version);
            if value > 0 {
                out.push((node.key, value));
            }
            walk(&node.right, version, out);
        }
    }
    let mut out = Vec::new();
    walk(link, version, &mut out);
    out
}

/// Check key order, heap order, revision order and summaries.
///
/// # Errors
///
/// A description of the first violated invariant.
pub fn check_invariants(link: &Link) -> Result<(), String> {
    fn walk(
        link: &Link,
        lo: Option<u64>,
        hi: Option<u64>,
        parent: Option<Rank>,
    ) -> Result<Option<Summary>, String> {
        let Some(node) = link else {
            return Ok(Some(Summary {
                aggregate: 0,
                watermark: 0,
                tombstones: 0,
            }));
        };
        let key = node.key;
        if lo.is_some_and(|lo| key <= lo) || hi.is_some_and(|hi| key >= hi) {
            return Err(format!("key {key} out of order"));
        }
        if parent.is_some_and(|p| node.rank() > p) {
            return Err(format!("key {key} violates heap order"));
        }
        if node.revisions.is_empty() || !node.revisions.is_sorted_by_key(|r| r.version) {
            return Err(format!("key {key} has a malformed history"));
        }
        let left = walk(&node.left, lo, Some(key), Some(node.rank()))?;
        let right = walk(&node.right, Some(key), hi, Some(node.rank()))?;
        let (Some(left), Some(right)) = (left, right) else {
            return Ok(None);
        };
        let latest = node.latest();
        let expected = Summary {
            aggregate: left.aggregate + latest.value + right.aggregate,
            watermark: latest.version.max(left.watermark).max(right.watermark),
            tombstones: left.tombstones + usize::from(latest.value == 0) + right.tombstones,
        };
        match node.summary {
            Some(cached) if cached != expected => Err(format!(
                "key {key} caches {cached:?}, subtree gives {expected:?}"
            )),
            Some(_) => Ok(Some(expected)),
            None => Ok(None),
        }
    }
    walk(link, None, None, None).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(points: &[(u64, usize)]) -> HistoryNode {
        let revisions = points
            .iter()
            .map(|&(value, version)| Revision { value, version })
            .collect();
        HistoryNode::with_revisions(priority::priority(1), 1, revisions)
    }

    #[test]
    fn value_at_picks_greatest_revision_at_or_below() {
        let node = history(&[(2, 3), (5, 7), (0, 9)]);
        assert_eq!(node.value_at(0), 0);
        assert_eq!(node.value_at(2), 0);
        assert_eq!(node.value_at(3), 2);
        assert_eq!(node.value_at(6), 2);
        assert_eq!(node.value_at(7), 5);
        assert_eq!(node.value_at(9), 0);
        assert_eq!(node.value_at(usize::MAX), 0);
    }

    #[test]
    fn weak_copy_keeps_latest_only() {
        let mut node = history(&[(2, 3), (5, 7)]);
        node.set_summary(Summary {
            aggregate: 5,
            watermark: 7,
            tombstones: 0,
        });
        let copy = node.weak_copy();
        assert_eq!(copy.revisions(), &[Revision { value: 5, version: 7 }]);
        assert!(!copy.is_persistent());
    }

    #[test]
    fn expose_reuses_transient_and_copies_persistent() {
        let child = Arc::new(HistoryNode::new(0, 0));
        let transient = Arc::new(HistoryNode::new(4, 1).with_children(Some(child.clone()), None));
        let (left, owned, right) = expose(transient);
        assert!(left.is_some_and(|l| Arc::ptr_eq(&l, &child)));
        assert!(right.is_none());
        assert_eq!(owned.latest().version, 4);

        let mut persistent = HistoryNode::new(4, 1).with_children(Some(child.clone()), None);
        persistent.set_summary(Summary {
            aggregate: 2,
            watermark: 4,
            tombstones: 0,
        });
        let persistent = Arc::new(persistent);
        let (left, copy, _) = expose(Arc::clone(&persistent));
        assert!(left.is_some_and(|l| Arc::ptr_eq(&l, &child)));
        assert!(!copy.is_persistent());
        assert_eq!(Arc::strong_count(&persistent), 1);
    }
}
