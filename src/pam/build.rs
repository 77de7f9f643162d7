//! Construction of transient trees: the initial map and per-batch deltas.

use std::sync::Arc;

use super::{HistoryNode, Link, Revision, augment_parallel, unshared};

/// Inputs at most this long are built without forking.
const SEQUENTIAL_CUTOFF: usize = 1024;

/// Partition a transient tree into keys `< key` and keys `> key`.
pub fn split(link: Link, key: u64) -> (Link, Link) {
    let Some(mut node) = link else {
        return (None, None);
    };
    let inner = unshared(&mut node);
    if key < inner.key() {
        let (lower, upper) = split(inner.left.take(), key);
        inner.left = upper;
        (lower, Some(node))
    } else {
        let (lower, upper) = split(inner.right.take(), key);
        inner.right = lower;
        (Some(node), upper)
    }
}

/// Union of two transient trees whose equal keys combine with `combine`.
///
/// `a` holds the earlier elements; `combine(a_node, b_node)` folds the
/// history of `b_node` into `a_node`.
fn union<F>(a: Link, b: Link, combine: &F) -> Link
where
    F: Fn(&mut HistoryNode, &HistoryNode) + Sync,
{
    let (mut a, mut b) = match (a, b) {
        (None, b) => return b,
        (a, None) => return a,
        (Some(a), Some(b)) => (a, b),
    };

    if a.key() == b.key() {
        let (b_left, b_right) = unshared(&mut b).take_children();
        let keep = unshared(&mut a);
        combine(keep, b.as_ref());
        drop(b);
        let (a_left, a_right) = keep.take_children();
        (keep.left, keep.right) = rayon::join(
            || union(a_left, b_left, combine),
            || union(a_right, b_right, combine),
        );
        return Some(a);
    }

    if a.rank() > b.rank() {
        let (lower, upper) = split(Some(b), a.key());
        let root = unshared(&mut a);
        let (left, right) = root.take_children();
        (root.left, root.right) = rayon::join(
            || union(left, lower, combine),
            || union(right, upper, combine),
        );
        Some(a)
    } else {
        let (lower, upper) = split(Some(a), b.key());
        let root = unshared(&mut b);
        let (left, right) = root.take_children();
        (root.left, root.right) = rayon::join(
            || union(lower, left, combine),
            || union(upper, right, combine),
        );
        Some(b)
    }
}

/// Merge for the initial build: equal keys add their first counts.
pub fn merge(a: Link, b: Link) -> Link {
    union(a, b, &|keep, other| {
        keep.revisions_mut()[0].value += other.revisions()[0].value;
    })
}

/// Merge for batch deltas: `b`'s revisions are later than `a`'s and are
/// appended with their counts offset by `a`'s latest, so counts stay
/// cumulative across the batch.
pub fn merge_versioned(a: Link, b: Link) -> Link {
    union(a, b, &|keep, other| {
        let base = keep.latest().value;
        keep.revisions_mut()
            .extend(other.revisions().iter().map(|r| Revision {
                value: base + r.value,
                version: r.version,
            }));
    })
}

/// Build the version-0 map from `keys` (any order, duplicates counted).
#[must_use]
pub fn build(keys: &[u64]) -> Link {
    match keys {
        [] => None,
        [key] => Some(Arc::new(HistoryNode::new(0, *key))),
        _ => {
            let (lower, upper) = keys.split_at(keys.len() / 2);
            let (a, b) = if keys.len() > SEQUENTIAL_CUTOFF {
                rayon::join(|| build(lower), || build(upper))
            } else {
                (build(lower), build(upper))
            };
            merge(a, b)
        }
    }
}

/// Build and augment the version-0 map.
#[must_use]
pub fn build_parallel(keys: &[u64]) -> Link {
    let mut root = build(keys);
    augment_parallel(&mut root);
    root
}

/// Build a transient delta from `(key, version)` pairs in version order.
///
/// Each key's node records one revision per occurrence, counting
/// occurrences cumulatively.
#[must_use]
pub fn build_versioned(entries: &[(u64, usize)]) -> Link {
    match entries {
        [] => None,
        [(key, version)] => Some(Arc::new(HistoryNode::new(*version, *key))),
        _ => {
            let (lower, upper) = entries.split_at(entries.len() / 2);
            let (a, b) = if entries.len() > SEQUENTIAL_CUTOFF {
                rayon::join(|| build_versioned(lower), || build_versioned(upper))
            } else {
                (build_versioned(lower), build_versioned(upper))
            };
            merge_versioned(a, b)
        }
    }
}
