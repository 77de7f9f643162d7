//! Merging a transient insert delta into a persistent tree.

use std::sync::Arc;

use super::copy_subtract::batch_base;
use super::{HistoryNode, Link, Revision, augment_parallel, build_versioned, expose, split};

/// Split a persistent tree at `key`, copying the nodes on the split path.
pub fn copy_split(link: &Link, key: u64) -> (Link, Link) {
    let Some(node) = link else {
        return (None, None);
    };
    if key < node.key() {
        let (lower, upper) = copy_split(node.left(), key);
        let copy = node.weak_copy().with_children(upper, node.right().clone());
        (lower, Some(Arc::new(copy)))
    } else {
        let (lower, upper) = copy_split(node.right(), key);
        let copy = node.weak_copy().with_children(node.left().clone(), lower);
        (Some(Arc::new(copy)), upper)
    }
}

/// Rebase a delta history on the count `old` held before the batch.
///
/// The old revision stays in front, so versions inside the batch that
/// precede the key's first delta revision still read the old count.
fn rebase(node: &mut HistoryNode, old: Revision) {
    let revisions = node.revisions_mut();
    for revision in revisions.iter_mut() {
        revision.value += old.value;
    }
    revisions.insert(0, old);
}

/// Merge the transient delta `delta` into the persistent tree `old`.
///
/// Old nodes that outrank the delta are weak-copied; delta nodes are
/// consumed in place. The result is transient along every merged path and
/// shares all untouched subtrees with `old`.
#[must_use]
pub fn copy_merge(old: &Link, delta: Link) -> Link {
    let Some(old_node) = old else { return delta };
    let Some(delta_node) = delta else {
        return old.clone();
    };

    let (root, old_left, old_right, delta_left, delta_right) =
        if old_node.rank() > delta_node.rank() {
            let (delta_left, delta_right) = split(Some(delta_node), old_node.key());
            (
                old_node.weak_copy(),
                old_node.left().clone(),
                old_node.right().clone(),
                delta_left,
                delta_right,
            )
        } else {
            let (delta_left, mut root, delta_right) = expose(delta_node);
            let (old_left, old_right) = if old_node.key() == root.key() {
                rebase(&mut root, old_node.latest());
                (old_node.left().clone(), old_node.right().clone())
            } else {
                copy_split(old, root.key())
            };
            (root, old_left, old_right, delta_left, delta_right)
        };

    let (left, right) = rayon::join(
        || copy_merge(&old_left, delta_left),
        || copy_merge(&old_right, delta_right),
    );
    Some(Arc::new(root.with_children(left, right)))
}

/// Insert one batch of `(key, version)` pairs, in version order, and
/// summarize the result on the current rayon pool.
///
/// Tombstones of earlier batches are dropped on the way.
#[must_use]
pub fn inserted(old: &Link, batch: &[(u64, usize)]) -> Link {
    let mut root = copy_merge(&batch_base(old), build_versioned(batch));
    augment_parallel(&mut root);
    root
}
