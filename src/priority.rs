//! Key-derived node priorities.
//!
//! A treap needs an independent random priority per key. Deriving it from a
//! keyed hash of the key keeps every engine, thread and version agreeing on
//! the same priority without carrying any random state, so the shape of a
//! tree is a pure function of its key set.
//!
//! The hash is xxh3 with a fixed seed. It mixes well enough for treap
//! balance but is not a cipher; inputs are not assumed adversarial.

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Hash key used for every priority in the process.
const PRIORITY_SEED: u64 = 0x243f_6a88_85a3_08d3;

/// Priority of `key`.
#[inline]
#[must_use]
pub fn priority(key: u64) -> u64 {
    xxh3_64_with_seed(&key.to_le_bytes(), PRIORITY_SEED)
}

/// Total order used for heap placement: priority first, key as tie-break.
///
/// Distinct keys never compare equal, so `rank(a) == rank(b)` iff `a == b`.
pub type Rank = (u64, u64);

/// Rank of `key` with a precomputed priority.
#[inline]
#[must_use]
pub const fn rank(priority: u64, key: u64) -> Rank {
    (priority, key)
}
