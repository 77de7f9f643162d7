//! Subtracting a transient delete delta from a persistent tree.

use std::sync::Arc;

use super::{HistoryNode, Link, Revision, augment_parallel, build_versioned, expose, split};

/// Join two trees whose keys are ordered (`left < right`).
///
/// Persistent roots on the merged spines are weak-copied; transient ones are
/// reused in place.
#[must_use]
pub fn copy_concat(left: Link, right: Link) -> Link {
    let (l, r) = match (left, right) {
        (None, right) => return right,
        (left, None) => return left,
        (Some(l), Some(r)) => (l, r),
    };
    let node = if l.rank() > r.rank() {
        let (l_left, root, l_right) = expose(l);
        root.with_children(l_left, copy_concat(l_right, Some(r)))
    } else {
        let (r_left, root, r_right) = expose(r);
        root.with_children(copy_concat(Some(l), r_left), r_right)
    };
    Some(Arc::new(node))
}

/// History after removing the delta's cumulative delete counts from the
/// count `old` held before the batch. `None` when every revision is zero.
fn subtracted(old: Revision, delta: &HistoryNode) -> Option<Vec<Revision>> {
    let revisions: Vec<Revision> = std::iter::once(old)
        .chain(delta.revisions().iter().map(|r| Revision {
            value: old.value.saturating_sub(r.value),
            version: r.version,
        }))
        .collect();
    revisions.iter().any(|r| r.value > 0).then_some(revisions)
}

/// Remove the keys of the transient delta `delta` from the persistent tree
/// `old`, one occurrence per delta revision.
///
/// Counts saturate at zero, and keys absent from `old` are ignored. A node
/// that reaches zero stays as a zero-count tombstone while an earlier
/// version of the batch still sees it; a node that was already zero is
/// unlinked and its children joined. Tombstones left elsewhere in `old` are
/// untouched here; [`copy_prune`] drops them before the next batch.
#[must_use]
pub fn copy_subtract(old: &Link, delta: Link) -> Link {
    let Some(old_node) = old else { return None };
    let Some(delta_node) = delta else {
        return old.clone();
    };

    if old_node.key() == delta_node.key() {
        let (delta_left, delta_root, delta_right) = expose(delta_node);
        let history = subtracted(old_node.latest(), &delta_root);
        let (left, right) = rayon::join(
            || copy_subtract(old_node.left(), delta_left),
            || copy_subtract(old_node.right(), delta_right),
        );
        return match history {
            Some(revisions) => Some(Arc::new(
                HistoryNode::with_revisions(old_node.priority(), old_node.key(), revisions)
                    .with_children(left, right),
            )),
            None => copy_concat(left, right),
        };
    }

    if old_node.rank() > delta_node.rank() {
        let (delta_left, delta_right) = split(Some(delta_node), old_node.key());
        let (left, right) = rayon::join(
            || copy_subtract(old_node.left(), delta_left),
            || copy_subtract(old_node.right(), delta_right),
        );
        Some(Arc::new(old_node.weak_copy().with_children(left, right)))
    } else {
        // the delta root outranks all of `old`, so its key is absent there
        let (delta_left, _, delta_right) = expose(delta_node);
        copy_subtract(old, copy_concat(delta_left, delta_right))
    }
}

/// Copy of the persistent tree `link` with every zero-count node unlinked.
///
/// Subtrees whose summary counts no tombstones are shared untouched; the
/// copied paths come back transient. A tombstone only serves versions of
/// the batch that created it, and those stay readable from that batch's
/// root.
#[must_use]
pub fn copy_prune(link: &Link) -> Link {
    let Some(node) = link else { return None };
    if node.summary().is_some_and(|s| s.tombstones == 0) {
        return link.clone();
    }
    let (left, right) = rayon::join(|| copy_prune(node.left()), || copy_prune(node.right()));
    if node.latest().value == 0 {
        copy_concat(left, right)
    } else {
        Some(Arc::new(node.weak_copy().with_children(left, right)))
    }
}

/// `old` without tombstones, summarized so it can be the persistent side of
/// a merge.
pub(super) fn batch_base(old: &Link) -> Link {
    let mut base = copy_prune(old);
    augment_parallel(&mut base);
    base
}

/// Delete one batch of `(key, version)` pairs, in version order, and
/// summarize the result on the current rayon pool.
#[must_use]
pub fn deleted(old: &Link, batch: &[(u64, usize)]) -> Link {
    let mut root = copy_subtract(&batch_base(old), build_versioned(batch));
    augment_parallel(&mut root);
    root
}
