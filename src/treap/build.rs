//! Split, merge, and parallel construction on unpublished trees.
//!
//! These operate on nodes nobody else references yet and rewire them in
//! place. Published trees go through [`super::path_copy`] instead.

use std::sync::Arc;

use super::{Link, Node, augment_parallel, unshared};

/// Inputs at most this long are built without forking.
const SEQUENTIAL_CUTOFF: usize = 1024;

/// Partition an unpublished tree into keys `< key` and keys `> key`.
///
/// A node equal to `key` lands on the left; callers only split at keys that
/// outrank the whole tree, so it cannot be present.
pub fn split(link: Link, key: u64) -> (Link, Link) {
    let Some(mut node) = link else {
        return (None, None);
    };
    let inner = unshared(&mut node);
    let (left, right) = inner.take_children();
    if key < inner.key() {
        let (lower, upper) = split(left, key);
        inner.set_left(upper);
        inner.set_right(right);
        (lower, Some(node))
    } else {
        let (lower, upper) = split(right, key);
        inner.set_left(left);
        inner.set_right(lower);
        (Some(node), upper)
    }
}

/// Union of two unpublished trees by rank. Equal keys add their counts.
pub fn merge(a: Link, b: Link) -> Link {
    let (mut a, mut b) = match (a, b) {
        (None, b) => return b,
        (a, None) => return a,
        (Some(a), Some(b)) => (a, b),
    };

    if a.key() == b.key() {
        let extra = a.value();
        let (a_left, a_right) = unshared(&mut a).take_children();
        drop(a);
        let keep = unshared(&mut b);
        keep.add_value(extra);
        let (b_left, b_right) = keep.take_children();
        let (left, right) = rayon::join(|| merge(a_left, b_left), || merge(a_right, b_right));
        keep.set_left(left);
        keep.set_right(right);
        return Some(b);
    }

    if a.rank() > b.rank() {
        let (lower, upper) = split(Some(b), a.key());
        let root = unshared(&mut a);
        let (left, right) = root.take_children();
        let (left, right) = rayon::join(|| merge(left, lower), || merge(right, upper));
        root.set_left(left);
        root.set_right(right);
        Some(a)
    } else {
        let (lower, upper) = split(Some(a), b.key());
        let root = unshared(&mut b);
        let (left, right) = root.take_children();
        let (left, right) = rayon::join(|| merge(lower, left), || merge(upper, right));
        root.set_left(left);
        root.set_right(right);
        Some(b)
    }
}

/// Build version 0 from `keys` (any order, duplicates counted).
///
/// The result is not augmented; see [`build_parallel`].
#[must_use]
pub fn build(keys: &[u64]) -> Link {
    match keys {
        [] => None,
        [key] => Some(Arc::new(Node::new(0, *key).with_children(None, None))),
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

/// Build and augment version 0 on the current rayon pool.
#[must_use]
pub fn build_parallel(keys: &[u64]) -> Link {
    let root = build(keys);
    augment_parallel(&root);
    root
}
