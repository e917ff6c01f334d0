//! Fixed-capacity bit vector over slot positions and group ids.
//!
//! Both ranges share the same hard domain limit of 256, so one type
//! covers active-slot tracking, group presence and the per-evaluation
//! exclusion scratch map.

/// Hard limit on simultaneous slots and group ids per filter set.
pub const MAP_CAPACITY: usize = 256;

const WORDS: usize = MAP_CAPACITY / u64::BITS as usize;

#[derive(Clone)]
pub(crate) struct Bitmap {
    words: [u64; WORDS],
}

impl Bitmap {
    pub(crate) fn new() -> Self {
        Bitmap { words: [0; WORDS] }
    }

    pub(crate) fn set(&mut self, index: usize) {
        debug_assert!(index < MAP_CAPACITY);
        self.words[index / 64] |= 1 << (index % 64);
    }

    pub(crate) fn clear(&mut self, index: usize) {
        debug_assert!(index < MAP_CAPACITY);
        self.words[index / 64] &= !(1 << (index % 64));
    }

    pub(crate) fn test(&self, index: usize) -> bool {
        debug_assert!(index < MAP_CAPACITY);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub(crate) fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub(crate) fn clear_all(&mut self) {
        self.words = [0; WORDS];
    }

    /// Lowest unset index `>= start`, if any. Used to walk candidate
    /// slots in ascending position order.
    pub(crate) fn find_first_clear(&self, start: usize) -> Option<usize> {
        (start..MAP_CAPACITY).find(|&index| !self.test(index))
    }
}
