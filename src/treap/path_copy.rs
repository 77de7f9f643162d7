//! Path-copying updates of published trees.
//!
//! Each function reads a published version and returns the root of a new
//! one stamped with `version`. Only nodes on the search path (plus the split
//! or concat spines at the arrival point) are copied; every other subtree is
//! shared with the input.

use std::sync::Arc;

use super::{Link, Node};
use crate::priority::rank;

/// Copying split of a published tree into keys `< key` and keys `> key`.
pub fn split_copy(version: usize, link: &Link, key: u64) -> (Link, Link) {
    let Some(node) = link else {
        return (None, None);
    };
    if key < node.key() {
        let (lower, upper) = split_copy(version, node.left(), key);
        let copy = node
            .weak_copy(version)
            .with_children(upper, node.right().clone());
        (lower, Some(Arc::new(copy)))
    } else {
        let (lower, upper) = split_copy(version, node.right(), key);
        let copy = node
            .weak_copy(version)
            .with_children(node.left().clone(), lower);
        (Some(Arc::new(copy)), upper)
    }
}

/// Place a fresh node for `key` above `past`, splitting `past` under it.
#[must_use]
pub fn deploy(version: usize, past: &Link, priority: u64, key: u64) -> Arc<Node> {
    let (lower, upper) = split_copy(version, past, key);
    Arc::new(Node::with_priority(version, priority, key).with_children(lower, upper))
}

/// Insert one occurrence of `key` into `past`, producing `version`.
#[must_use]
pub fn search_insert(version: usize, past: &Link, priority: u64, key: u64) -> Link {
    let Some(node) = past else {
        return Some(Arc::new(
            Node::with_priority(version, priority, key).with_children(None, None),
        ));
    };
    let copy = if node.rank() > rank(priority, key) {
        let copy = node.weak_copy(version);
        if key < node.key() {
            copy.with_children(
                search_insert(version, node.left(), priority, key),
                node.right().clone(),
            )
        } else {
            copy.with_children(
                node.left().clone(),
                search_insert(version, node.right(), priority, key),
            )
        }
    } else if node.key() == key {
        node.weak_copy(version)
            .with_value(node.value() + 1)
            .with_children(node.left().clone(), node.right().clone())
    } else {
        return Some(deploy(version, past, priority, key));
    };
    Some(Arc::new(copy))
}

/// Join two published trees whose keys are ordered (`left < right`),
/// copying the merged spines for `version`.
#[must_use]
pub fn concat(version: usize, left: &Link, right: &Link) -> Link {
    let (l, r) = match (left, right) {
        (None, _) => return right.clone(),
        (_, None) => return left.clone(),
        (Some(l), Some(r)) => (l, r),
    };
    let copy = if l.rank() > r.rank() {
        l.weak_copy(version)
            .with_children(l.left().clone(), concat(version, l.right(), right))
    } else {
        r.weak_copy(version)
            .with_children(concat(version, left, r.left()), r.right().clone())
    };
    Some(Arc::new(copy))
}

/// Remove one occurrence of `key` from `past`, producing `version`.
///
/// The node disappears when its count drops to zero. Deleting an absent key
/// copies the search path and otherwise leaves the tree unchanged.
#[must_use]
pub fn search_delete(version: usize, past: &Link, priority: u64, key: u64) -> Link {
    let node = past.as_ref()?;
    let copy = if node.rank() > rank(priority, key) {
        let copy = node.weak_copy(version);
        if key < node.key() {
            copy.with_children(
                search_delete(version, node.left(), priority, key),
                node.right().clone(),
            )
        } else {
            copy.with_children(
                node.left().clone(),
                search_delete(version, node.right(), priority, key),
            )
        }
    } else if node.key() == key {
        if node.value() == 1 {
            return concat(version, node.left(), node.right());
        }
        node.weak_copy(version)
            .with_value(node.value() - 1)
            .with_children(node.left().clone(), node.right().clone())
    } else {
        return past.clone();
    };
    Some(Arc::new(copy))
}
