//! Fork-join summaries for fresh batch trees.

use super::{Link, Summary, unshared};

/// Below this depth the recursion stops forking.
const SEQUENTIAL_DEPTH: u32 = 12;

const EMPTY: Summary = Summary {
    aggregate: 0,
    watermark: 0,
    tombstones: 0,
};

/// Summarize every transient node under `link`, making the tree persistent.
///
/// Stops at persistent nodes, so only the nodes the last batch created or
/// copied are visited. Returns the root's aggregate.
pub fn augment_parallel(link: &mut Link) -> u64 {
    summarize(link, 0).aggregate
}

fn summarize(link: &mut Link, depth: u32) -> Summary {
    let Some(node) = link else { return EMPTY };
    if let Some(summary) = node.summary() {
        return summary;
    }
    let node = unshared(node);
    let latest = node.latest();
    let (left, right) = if depth < SEQUENTIAL_DEPTH {
        let (left, right) = (&mut node.left, &mut node.right);
        rayon::join(|| summarize(left, depth + 1), || summarize(right, depth + 1))
    } else {
        (summarize(&mut node.left, depth + 1), summarize(&mut node.right, depth + 1))
    };
    let summary = Summary {
        aggregate: left.aggregate + latest.value + right.aggregate,
        watermark: latest.version.max(left.watermark).max(right.watermark),
        tombstones: left.tombstones + usize::from(latest.value == 0) + right.tombstones,
    };
    node.set_summary(summary);
    summary
}
