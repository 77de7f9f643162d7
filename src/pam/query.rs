//! Versioned point lookups and range aggregates over a history tree.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{HistoryNode, Link};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cover {
    OpenOpen,
    OpenClosed,
    ClosedOpen,
    ClosedClosed,
}

/// The node holding `key`, if present (possibly as a zero tombstone).
#[must_use]
pub fn find_node(link: &Link, key: u64) -> Option<&Arc<HistoryNode>> {
    let mut cur = link.as_ref();
    while let Some(node) = cur {
        cur = match key.cmp(&node.key()) {
            Ordering::Less => node.left().as_ref(),
            Ordering::Greater => node.right().as_ref(),
            Ordering::Equal => return Some(node),
        };
    }
    None
}

/// Count of `key` as of `version`; 0 when absent.
#[must_use]
pub fn find(link: &Link, version: usize, key: u64) -> u64 {
    find_node(link, key).map_or(0, |node| node.value_at(version))
}

/// Sum of counts as of `version` over keys in `[lo, hi]`.
///
/// A fully covered subtree answers from its summary only when the summary's
/// watermark is at or below `version`.
#[must_use]
pub fn range_aggregate(link: &Link, version: usize, lo: u64, hi: u64) -> u64 {
    if lo > hi {
        return 0;
    }
    sum(link, version, lo, hi, Cover::OpenOpen)
}

fn sum(link: &Link, version: usize, lo: u64, hi: u64, cover: Cover) -> u64 {
    let Some(node) = link else { return 0 };
    let key = node.key();
    let (left, right) = match cover {
        Cover::ClosedClosed => {
            if let Some(summary) = node.summary().filter(|s| s.watermark <= version) {
                return summary.aggregate;
            }
            (cover, cover)
        }
        Cover::OpenOpen if key < lo => return sum(node.right(), version, lo, hi, cover),
        Cover::OpenOpen if key > hi => return sum(node.left(), version, lo, hi, cover),
        Cover::OpenOpen => (Cover::OpenClosed, Cover::ClosedOpen),
        Cover::OpenClosed if key < lo => return sum(node.right(), version, lo, hi, cover),
        Cover::OpenClosed => (cover, Cover::ClosedClosed),
        Cover::ClosedOpen if key > hi => return sum(node.left(), version, lo, hi, cover),
        Cover::ClosedOpen => (Cover::ClosedClosed, cover),
    };
    sum(node.left(), version, lo, hi, left)
        + node.value_at(version)
        + sum(node.right(), version, lo, hi, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pam::{augment_parallel, build_parallel, build_versioned, copy_merge};

    #[test]
    fn stale_summaries_are_bypassed() {
        let v0 = build_parallel(&[1, 2, 3, 4]);
        let mut v2 = copy_merge(&v0, build_versioned(&[(2, 1), (3, 2)]));
        augment_parallel(&mut v2);
        assert_eq!(range_aggregate(&v2, 0, 0, 10), 4);
        assert_eq!(range_aggregate(&v2, 1, 0, 10), 5);
        assert_eq!(range_aggregate(&v2, 2, 0, 10), 6);
        assert_eq!(range_aggregate(&v2, 2, 2, 3), 4);
        assert_eq!(range_aggregate(&v2, 2, 3, 2), 0);
    }

    #[test]
    fn lookups_by_version() {
        let v0 = build_parallel(&[9, 9]);
        assert_eq!(find(&v0, 0, 9), 2);
        assert_eq!(find(&v0, 0, 8), 0);
        assert!(find_node(&v0, 8).is_none());
    }
}
