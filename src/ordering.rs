//! Standard memory orderings for the cross-thread protocols.
//!
//! Every counter handoff in the crate is a single-writer Release store read
//! with an Acquire load. These constants keep the pairing visible at each
//! access point.

use std::sync::atomic::Ordering;

/// Ordering for consuming a counter or cell published by another thread.
/// Pairs with [`PUBLISH`].
pub const OBSERVE: Ordering = Ordering::Acquire;

/// Ordering for publishing a counter after the data it covers is written.
/// Pairs with [`OBSERVE`].
pub const PUBLISH: Ordering = Ordering::Release;

/// Ordering for claiming a task id.
/// Only uniqueness matters; task data is ordered by the `submitted` counter.
pub const CLAIM: Ordering = Ordering::AcqRel;

/// Ordering for the cached subtree aggregate.
/// Racing writers store the same value, readers only need the stored word.
pub const AGGREGATE: Ordering = Ordering::Relaxed;

/// Ordering for the query workers' run flag.
pub const RUN_FLAG: Ordering = Ordering::SeqCst;
