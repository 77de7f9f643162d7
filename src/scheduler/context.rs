//! Per-version task state and the resumable update steps.
//!
//! A task is the path-copying insert or delete of one version, unrolled into
//! steps that each build one level of the new tree. Any thread that holds the
//! task may run the next step; the scheduler hands the task from the master
//! through every pipe to one worker, and only the current holder touches it.

use std::cell::UnsafeCell;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, OnceLock};

use crossbeam::utils::{Backoff, CachePadded};

use crate::ordering::{OBSERVE, PUBLISH};
use crate::priority::{self, rank};
use crate::treap::{self, Link, Node, concat, deploy, search_delete, search_insert};

/// Stage value of a finished task.
pub(super) const STAGE_DONE: usize = usize::MAX;

/// What a task does to the previous version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// No change; the version shares its predecessor's root (queries).
    None,
    /// Add one occurrence of the key.
    Insert,
    /// Remove one occurrence of the key.
    Delete,
}

/// Which recursion the next step continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Descending toward the key.
    Search,
    /// The key's node was copied; its children are the old node's.
    SetReference,
    /// The key's node is being removed; its children are joined.
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
}

/// Block until `committed` reaches `version`.
pub(super) fn wait_committed(committed: &AtomicUsize, version: usize) {
    let backoff = Backoff::new();
    while committed.load(OBSERVE) < version {
        backoff.snooze();
    }
}

// ============================================================================
//  TaskState
// ============================================================================

/// Mutable state of one task, owned by whichever thread holds the task.
#[derive(Debug)]
pub(super) struct TaskState {
    op: Operation,
    step: Step,
    dir: Direction,
    key: u64,
    priority: u64,
    version: usize,
    /// Node of this version whose children the next step sets.
    cur: Link,
    /// Node of the previous version being unwound.
    past: Link,
    /// Concat operands.
    left: Link,
    right: Link,
    done: bool,
}

impl TaskState {
    const fn empty() -> Self {
        Self {
            op: Operation::None,
            step: Step::Search,
            dir: Direction::Left,
            key: 0,
            priority: 0,
            version: 0,
            cur: None,
            past: None,
            left: None,
            right: None,
            done: false,
        }
    }

    /// Whether the task has produced its whole tree.
    pub(super) const fn is_done(&self) -> bool {
        self.done
    }

    /// Version of the node this task is unwinding. It must be committed
    /// before the task may run to completion.
    pub(super) fn dependency(&self) -> usize {
        self.past.as_ref().map_or(0, |past| past.version())
    }

    /// Run step 0 against `previous` and return this version's root.
    pub(super) fn start(
        &mut self,
        op: Operation,
        key: u64,
        version: usize,
        previous: &Link,
        committed: &AtomicUsize,
    ) -> Link {
        self.op = op;
        self.version = version;
        if op == Operation::None {
            self.done = true;
            return previous.clone();
        }
        self.key = key;
        self.priority = priority::priority(key);
        self.past = previous.clone();
        let root = self.arrive(committed);
        self.cur = root.clone();
        root
    }

    /// Decide what replaces `past` in the new version.
    ///
    /// Returns the node to link in place of `past`. Unless the task finishes
    /// here, that node is still under construction and becomes `cur`.
    fn arrive(&mut self, committed: &AtomicUsize) -> Link {
        let Some(past) = self.past.clone() else {
            self.finish();
            return match self.op {
                Operation::Insert => Some(Arc::new(
                    Node::with_priority(self.version, self.priority, self.key)
                        .with_children(None, None),
                )),
                Operation::Delete | Operation::None => None,
            };
        };

        if past.rank() > rank(self.priority, self.key) {
            self.dir = if self.key < past.key() {
                Direction::Left
            } else {
                Direction::Right
            };
            return Some(Arc::new(past.weak_copy(self.version)));
        }

        if past.key() == self.key {
            let value = match self.op {
                Operation::Insert => past.value() + 1,
                Operation::Delete if past.value() > 1 => past.value() - 1,
                Operation::Delete => {
                    wait_committed(committed, past.version());
                    self.left = past.left().clone();
                    self.right = past.right().clone();
                    self.step = Step::Concat;
                    return self.join();
                }
                Operation::None => unreachable!("no-op task reached a tree step"),
            };
            self.step = Step::SetReference;
            return Some(Arc::new(past.weak_copy(self.version).with_value(value)));
        }

        // arrival point without the key
        let link = match self.op {
            Operation::Insert => {
                wait_committed(committed, past.version());
                Some(deploy(self.version, &self.past, self.priority, self.key))
            }
            Operation::Delete => self.past.clone(),
            Operation::None => unreachable!("no-op task reached a tree step"),
        };
        self.finish();
        link
    }

    /// One level of concat: copy the higher-ranked operand root.
    fn join(&mut self) -> Link {
        match (&self.left, &self.right) {
            (None, right) => {
                let link = right.clone();
                self.finish();
                link
            }
            (left, None) => {
                let link = left.clone();
                self.finish();
                link
            }
            (Some(l), Some(r)) => {
                let (node, dir) = if l.rank() > r.rank() {
                    (l, Direction::Right)
                } else {
                    (r, Direction::Left)
                };
                let copy = node.weak_copy(self.version);
                self.dir = dir;
                Some(Arc::new(copy))
            }
        }
    }

    fn cur_node(&self) -> Arc<Node> {
        self.cur
            .clone()
            .unwrap_or_else(|| unreachable!("running task {} has no node", self.version))
    }

    /// Advance the task by one tree level.
    pub(super) fn step(&mut self, committed: &AtomicUsize) {
        let cur = self.cur_node();
        match self.step {
            Step::Search => {
                let past = expect_node(self.past.take());
                let next = match self.dir {
                    Direction::Left => {
                        cur.set_right(past.right().clone());
                        self.past = past.left().clone();
                        let link = self.arrive(committed);
                        cur.set_left(link.clone());
                        link
                    }
                    Direction::Right => {
                        cur.set_left(past.left().clone());
                        self.past = past.right().clone();
                        let link = self.arrive(committed);
                        cur.set_right(link.clone());
                        link
                    }
                };
                self.cur = next;
            }
            Step::SetReference => self.set_reference(&cur),
            Step::Concat => {
                let next = match self.dir {
                    Direction::Left => {
                        let r = expect_node(self.right.take());
                        cur.set_right(r.right().clone());
                        self.right = r.left().clone();
                        let link = self.join();
                        cur.set_left(link.clone());
                        link
                    }
                    Direction::Right => {
                        let l = expect_node(self.left.take());
                        cur.set_left(l.left().clone());
                        self.left = l.right().clone();
                        let link = self.join();
                        cur.set_right(link.clone());
                        link
                    }
                };
                self.cur = next;
            }
        }
    }

    /// Finish the task with the sequential algorithms. Only valid once the
    /// dependency is committed, so nothing below `past` is still being built.
    pub(super) fn complete(&mut self) {
        let cur = self.cur_node();
        match self.step {
            Step::Search => {
                let past = expect_node(self.past.take());
                match self.dir {
                    Direction::Left => {
                        cur.set_right(past.right().clone());
                        cur.set_left(self.descend(past.left()));
                    }
                    Direction::Right => {
                        cur.set_left(past.left().clone());
                        cur.set_right(self.descend(past.right()));
                    }
                }
            }
            Step::SetReference => self.set_reference(&cur),
            Step::Concat => match self.dir {
                Direction::Left => {
                    let r = expect_node(self.right.take());
                    cur.set_right(r.right().clone());
                    cur.set_left(concat(self.version, &self.left, r.left()));
                }
                Direction::Right => {
                    let l = expect_node(self.left.take());
                    cur.set_left(l.left().clone());
                    cur.set_right(concat(self.version, l.right(), &self.right));
                }
            },
        }
        self.finish();
    }

    fn set_reference(&mut self, cur: &Node) {
        let past = expect_node(self.past.clone());
        cur.set_left(past.left().clone());
        cur.set_right(past.right().clone());
        self.finish();
    }

    fn descend(&self, past: &Link) -> Link {
        match self.op {
            Operation::Insert => search_insert(self.version, past, self.priority, self.key),
            Operation::Delete => search_delete(self.version, past, self.priority, self.key),
            Operation::None => unreachable!("no-op task reached a tree step"),
        }
    }

    /// Mark done and drop the scratch links.
    fn finish(&mut self) {
        self.done = true;
        self.cur = None;
        self.past = None;
        self.left = None;
        self.right = None;
    }
}

fn expect_node(link: Link) -> Arc<Node> {
    link.unwrap_or_else(|| unreachable!("task step on an empty subtree"))
}

// ============================================================================
//  Context
// ============================================================================

/// One version's slot in the scheduler.
pub(super) struct Context {
    state: UnsafeCell<TaskState>,
    /// Worker progress through the task; [`STAGE_DONE`] once finished.
    stage: CachePadded<AtomicUsize>,
    /// Root of this version, set when the task is issued.
    root: OnceLock<Link>,
}

// SAFETY: `state` is only accessed by the thread currently holding the task.
// Holding passes master -> pipe 1 -> ... -> pipe N -> worker, and each
// handoff is a Release store of a token or the `submitted` counter observed
// with Acquire by the next holder. `stage` is atomic and `root` is set once.
unsafe impl Sync for Context {}

impl Context {
    pub(super) fn new() -> Self {
        Self {
            state: UnsafeCell::new(TaskState::empty()),
            stage: CachePadded::new(AtomicUsize::new(0)),
            root: OnceLock::new(),
        }
    }

    /// The context of version 0: already finished, rooted at `root`.
    pub(super) fn finished(root: Link) -> Self {
        let ctx = Self::new();
        treap::set_once(&ctx.root, root);
        ctx.stage.store(STAGE_DONE, PUBLISH);
        ctx
    }

    /// Exclusive access to the task state.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the task (see the `Sync` impl) and
    /// must not keep the reference past handing the task on.
    #[allow(clippy::mut_from_ref)]
    pub(super) unsafe fn state(&self) -> &mut TaskState {
        // SAFETY: exclusivity is guaranteed by the caller per the contract above.
        unsafe { &mut *self.state.get() }
    }

    /// Publish the worker's progress.
    pub(super) fn set_stage(&self, stage: usize) {
        self.stage.store(stage, PUBLISH);
    }

    /// Worker progress of this task.
    pub(super) fn stage(&self) -> usize {
        self.stage.load(OBSERVE)
    }

    /// Whether the task is finished.
    pub(super) fn is_done(&self) -> bool {
        self.stage() == STAGE_DONE
    }

    /// Publish completion if the holder just finished the task.
    pub(super) fn settle(&self, state: &TaskState) {
        if state.is_done() {
            self.stage.store(STAGE_DONE, PUBLISH);
        }
    }

    pub(super) fn set_root(&self, root: Link) {
        treap::set_once(&self.root, root);
    }

    /// Root of this version, waiting until the master has set it.
    pub(super) fn root(&self) -> &Link {
        treap::settled(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treap::{augment, build_parallel, check_invariants, entries, value_of};

    fn run(op: Operation, key: u64, version: usize, previous: &Link, stepwise: bool) -> Link {
        let committed = AtomicUsize::new(usize::MAX);
        let mut state = TaskState::empty();
        let root = state.start(op, key, version, previous, &committed);
        while !state.is_done() {
            if stepwise {
                state.step(&committed);
            } else {
                state.complete();
            }
        }
        augment(&root);
        root
    }

    #[test]
    fn stepwise_matches_sequential() {
        let keys: Vec<u64> = (0..200).map(|k| k * 3).collect();
        let v0 = build_parallel(&keys);
        for (version, (op, key)) in [
            (Operation::Insert, 31),
            (Operation::Insert, 30),
            (Operation::Delete, 300),
            (Operation::Delete, 301),
            (Operation::Delete, 0),
        ]
        .into_iter()
        .enumerate()
        {
            let version = version + 1;
            let stepped = run(op, key, version, &v0, true);
            let completed = run(op, key, version, &v0, false);
            let sequential = match op {
                Operation::Insert => search_insert(version, &v0, priority::priority(key), key),
                _ => search_delete(version, &v0, priority::priority(key), key),
            };
            assert_eq!(entries(&stepped), entries(&sequential));
            assert_eq!(entries(&completed), entries(&sequential));
            check_invariants(&stepped).unwrap();
            check_invariants(&completed).unwrap();
        }
    }

    #[test]
    fn duplicate_delete_walks_concat() {
        let v0 = build_parallel(&(0..64).collect::<Vec<_>>());
        for key in 0..64 {
            let v1 = run(Operation::Delete, key, 1, &v0, true);
            assert_eq!(value_of(&v1, key), 0);
            assert_eq!(entries(&v1).len(), 63);
            check_invariants(&v1).unwrap();
        }
    }

    #[test]
    fn noop_shares_previous_root() {
        let v0 = build_parallel(&[1, 2, 3]);
        let v1 = run(Operation::None, 0, 1, &v0, true);
        assert!(Arc::ptr_eq(v0.as_ref().unwrap(), v1.as_ref().unwrap()));
    }

    #[test]
    fn finished_context_is_done() {
        let ctx = Context::finished(None);
        assert!(ctx.is_done());
        assert!(ctx.root().is_none());
    }
}
