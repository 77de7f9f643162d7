//! Append-only chain of batch roots and the per-reader cursor over it.
//!
//! Entry `i` covers the versions after entry `i - 1` up to and including its
//! own version, so the entry answering version `v` is the first one whose
//! version is at least `v`.

use std::sync::OnceLock;
use std::sync::atomic::AtomicUsize;

use crossbeam::utils::{Backoff, CachePadded};

use crate::error::EngineError;
use crate::ordering::{OBSERVE, PUBLISH};
use crate::pam::Link;

/// One committed batch.
#[derive(Debug)]
pub struct ChainEntry {
    /// Version of the last operation the batch applied.
    pub version: usize,
    /// Root after the batch.
    pub root: Link,
}

/// Pre-sized append-only sequence of [`ChainEntry`]s.
///
/// One writer appends; any number of readers navigate with a
/// [`ChainCursor`].
pub struct RootChain {
    entries: Box<[OnceLock<ChainEntry>]>,
    len: CachePadded<AtomicUsize>,
}

impl RootChain {
    /// A chain with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| OnceLock::new()).collect(),
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Append an entry. Single writer only.
    ///
    /// # Errors
    ///
    /// [`EngineError::CapacityExceeded`] when the chain is full.
    pub fn push(&self, version: usize, root: Link) -> Result<(), EngineError> {
        let index = self.len.load(OBSERVE);
        let slot = self.entries.get(index).ok_or(EngineError::CapacityExceeded {
            capacity: self.entries.len(),
        })?;
        debug_assert!(index == 0 || self.entry(index - 1).version < version);
        if slot.set(ChainEntry { version, root }).is_err() {
            unreachable!("root chain entry {index} written twice");
        }
        self.len.store(index + 1, PUBLISH);
        Ok(())
    }

    /// Number of published entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(OBSERVE)
    }

    /// Whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Published entry `index`. Panics if `index` is not published.
    #[must_use]
    pub fn entry(&self, index: usize) -> &ChainEntry {
        self.entries[index]
            .get()
            .unwrap_or_else(|| unreachable!("root chain entry {index} read before publication"))
    }

    /// The most recent entry, if any.
    #[must_use]
    pub fn last(&self) -> Option<&ChainEntry> {
        self.len().checked_sub(1).map(|index| self.entry(index))
    }
}

impl std::fmt::Debug for RootChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootChain")
            .field("len", &self.len())
            .field("capacity", &self.entries.len())
            .finish()
    }
}

/// A reader's position in a [`RootChain`].
///
/// Queries with temporal locality resolve in amortized O(1): the cursor
/// walks from where the previous lookup left off and only reloads the
/// chain length when it runs past the tail it last saw.
#[derive(Debug, Clone, Default)]
pub struct ChainCursor {
    position: usize,
    observed: usize,
}

impl ChainCursor {
    /// A cursor at the first entry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: 0,
            observed: 0,
        }
    }

    /// Current entry index.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// The entry covering `version`, waiting for the writer to append it.
    ///
    /// The chain must be non-empty.
    pub fn locate<'a>(&mut self, chain: &'a RootChain, version: usize) -> &'a ChainEntry {
        while self.position > 0 && version <= chain.entry(self.position - 1).version {
            self.position -= 1;
        }
        let backoff = Backoff::new();
        loop {
            if self.position < self.observed {
                let entry = chain.entry(self.position);
                if version <= entry.version {
                    return entry;
                }
                if self.position + 1 < self.observed {
                    self.position += 1;
                    backoff.reset();
                    continue;
                }
            }
            let observed = chain.len();
            if observed == self.observed {
                backoff.snooze();
            }
            self.observed = observed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn chain(versions: &[usize]) -> RootChain {
        let chain = RootChain::with_capacity(versions.len() + 4);
        for &version in versions {
            chain.push(version, None).unwrap();
        }
        chain
    }

    #[test]
    fn locate_picks_first_covering_entry() {
        let chain = chain(&[0, 4, 9, 10]);
        let mut cursor = ChainCursor::new();
        let expected = [(0, 0), (1, 1), (4, 1), (5, 2), (9, 2), (10, 3), (3, 1), (0, 0)];
        for (version, index) in expected {
            let entry = cursor.locate(&chain, version);
            assert_eq!(cursor.position(), index, "version {version}");
            assert_eq!(entry.version, chain.entry(index).version);
        }
    }

    #[test]
    fn push_past_capacity_fails() {
        let chain = RootChain::with_capacity(1);
        chain.push(0, None).unwrap();
        assert!(matches!(
            chain.push(1, None),
            Err(EngineError::CapacityExceeded { capacity: 1 })
        ));
        assert_eq!(chain.last().map(|e| e.version), Some(0));
    }

    #[test]
    fn locate_waits_for_the_writer() {
        let chain = Arc::new(chain(&[0]));
        let reader = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || {
                let mut cursor = ChainCursor::new();
                cursor.locate(&chain, 7).version
            })
        };
        thread::sleep(Duration::from_millis(10));
        chain.push(5, None).unwrap();
        chain.push(8, None).unwrap();
        assert_eq!(reader.join().unwrap(), 8);
    }
}
