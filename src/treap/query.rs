//! Point lookups and range aggregates over one published version.

use std::cmp::Ordering;
use std::sync::Arc;

use super::{Link, Node};

/// Which query bounds a subtree still has to be checked against.
///
/// `Open` means the bound on that side may cut through the subtree;
/// `Closed` means every key of the subtree already satisfies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cover {
    OpenOpen,
    OpenClosed,
    ClosedOpen,
    ClosedClosed,
}

/// The node holding `key`, if present.
#[must_use]
pub fn find(link: &Link, key: u64) -> Option<&Arc<Node>> {
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

/// Occurrence count of `key`; 0 when absent.
#[must_use]
pub fn value_of(link: &Link, key: u64) -> u64 {
    find(link, key).map_or(0, |node| node.value())
}

/// Sum of counts of keys in `[lo, hi]` (inclusive). Empty when `lo > hi`.
///
/// Fully covered subtrees answer from their cached aggregate; a subtree
/// whose aggregate has not been computed yet is summed by descent.
#[must_use]
pub fn range_aggregate(link: &Link, lo: u64, hi: u64) -> u64 {
    if lo > hi {
        return 0;
    }
    sum(link, lo, hi, Cover::OpenOpen)
}

fn sum(link: &Link, lo: u64, hi: u64, cover: Cover) -> u64 {
    let Some(node) = link else { return 0 };
    let key = node.key();
    match cover {
        Cover::ClosedClosed => node.aggregate().unwrap_or_else(|| {
            sum(node.left(), lo, hi, cover) + node.value() + sum(node.right(), lo, hi, cover)
        }),
        Cover::OpenOpen => {
            if key < lo {
                sum(node.right(), lo, hi, cover)
            } else if key > hi {
                sum(node.left(), lo, hi, cover)
            } else {
                sum(node.left(), lo, hi, Cover::OpenClosed)
                    + node.value()
                    + sum(node.right(), lo, hi, Cover::ClosedOpen)
            }
        }
        Cover::OpenClosed => {
            if key < lo {
                sum(node.right(), lo, hi, cover)
            } else {
                sum(node.left(), lo, hi, cover)
                    + node.value()
                    + sum(node.right(), lo, hi, Cover::ClosedClosed)
            }
        }
        Cover::ClosedOpen => {
            if key > hi {
                sum(node.left(), lo, hi, cover)
            } else {
                sum(node.left(), lo, hi, Cover::ClosedClosed)
                    + node.value()
                    + sum(node.right(), lo, hi, cover)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treap::{build, build_parallel};

    #[test]
    fn bounds_are_inclusive() {
        let root = build_parallel(&[1, 2, 3, 4, 5]);
        assert_eq!(range_aggregate(&root, 2, 4), 3);
        assert_eq!(range_aggregate(&root, 5, 5), 1);
        assert_eq!(range_aggregate(&root, 0, u64::MAX), 5);
        assert_eq!(range_aggregate(&root, 4, 2), 0);
        assert_eq!(range_aggregate(&root, 6, 100), 0);
    }

    #[test]
    fn unaugmented_tree_is_summed_by_descent() {
        let keys: Vec<u64> = (0..500).collect();
        let root = build(&keys);
        assert_eq!(range_aggregate(&root, 100, 199), 100);
        assert!(root.as_ref().unwrap().aggregate().is_none());
    }

    #[test]
    fn absent_keys_read_zero() {
        let root = build_parallel(&[10, 20, 20]);
        assert_eq!(value_of(&root, 20), 2);
        assert_eq!(value_of(&root, 15), 0);
        assert!(find(&None, 3).is_none());
    }
}
