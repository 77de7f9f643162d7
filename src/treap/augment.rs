//! Bottom-up subtree aggregates.
//!
//! Both passes stop at the first node whose aggregate is already cached, so
//! augmenting a fresh version only touches the nodes that version created.

use super::Link;

/// Below this depth the recursion stops forking.
const SEQUENTIAL_DEPTH: u32 = 12;

/// Compute and cache the aggregate of every uncached node under `link`.
pub fn augment(link: &Link) -> u64 {
    let Some(node) = link else { return 0 };
    if let Some(sum) = node.aggregate() {
        return sum;
    }
    let sum = augment(node.left()) + node.value() + augment(node.right());
    node.set_aggregate(sum);
    sum
}

/// Fork-join variant of [`augment`] for large fresh trees.
///
/// Runs on the current rayon pool.
pub fn augment_parallel(link: &Link) -> u64 {
    fork(link, 0)
}

fn fork(link: &Link, depth: u32) -> u64 {
    let Some(node) = link else { return 0 };
    if let Some(sum) = node.aggregate() {
        return sum;
    }
    let (left, right) = if depth < SEQUENTIAL_DEPTH {
        rayon::join(|| fork(node.left(), depth + 1), || fork(node.right(), depth + 1))
    } else {
        (augment(node.left()), augment(node.right()))
    };
    let sum = left + node.value() + right;
    node.set_aggregate(sum);
    sum
}
