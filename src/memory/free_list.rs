//! Free block table for the offset arena
//!
//! Tracks reclaimed logical ranges as an ordered map from byte offset to
//! block size. The map order gives first-fit its lowest-address tie-break
//! for free, and makes both address-order neighbors of a block reachable
//! without a scan, which is what eager coalescing needs.
//!
//! # Invariants
//!
//! - Ranges `[addr, addr + size)` are disjoint.
//! - No two blocks are adjacent once a mutation returns: adjacency always
//!   triggers a merge inside `insert`.

use std::collections::BTreeMap;

/// Ordered collection of disjoint free ranges in the logical address space
///
/// The arena is the only mutator. Fragmentation is bounded purely by the
/// eager merge in `insert`; the address space is never compacted.
#[derive(Debug, Default, Clone)]
pub struct FreeBlockTable {
    /// offset -> size, ordered by offset
    blocks: BTreeMap<usize, usize>,
}

impl FreeBlockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the lowest-address block whose size is at least `size`
    ///
    /// First-fit: the ascending scan makes the result deterministic and
    /// prefers the lowest address when several blocks would do.
    pub fn find_fit(&self, size: usize) -> Option<usize> {
        self.blocks
            .iter()
            .find(|&(_, &block_size)| block_size >= size)
            .map(|(&addr, _)| addr)
    }

    /// Carve `size` bytes off the front of the block at `addr`
    ///
    /// The block must exist and be at least `size` bytes; `find_fit`
    /// guarantees both. An exact match removes the entry, otherwise the
    /// remainder stays free at `addr + size`.
    pub fn consume(&mut self, addr: usize, size: usize) {
        let block_size = self
            .blocks
            .remove(&addr)
            .unwrap_or_else(|| panic!("consume of untracked free block at {addr}"));
        debug_assert!(block_size >= size);
        if block_size > size {
            self.blocks.insert(addr + size, block_size - size);
        }
    }

    /// Insert a freed range and merge it with any address-adjacent blocks
    ///
    /// The lower neighbor is the entry ending exactly at `addr`; the upper
    /// neighbor is the entry starting exactly at `addr + size`. Merging is
    /// associative over contiguous ranges, so checking each side once is
    /// enough to restore the no-adjacency invariant.
    pub fn insert(&mut self, addr: usize, size: usize) {
        let mut start = addr;
        let mut len = size;

        if let Some((&lo_addr, &lo_size)) = self.blocks.range(..addr).next_back() {
            if lo_addr + lo_size == addr {
                self.blocks.remove(&lo_addr);
                start = lo_addr;
                len += lo_size;
            }
        }

        if let Some(&hi_size) = self.blocks.get(&(addr + size)) {
            self.blocks.remove(&(addr + size));
            len += hi_size;
        }

        self.blocks.insert(start, len);
    }

    /// Whether `[addr, addr + size)` intersects any tracked free range
    ///
    /// Used by the arena to reject double-frees before they corrupt the
    /// table. Only the two address-order neighbors can intersect.
    pub fn overlaps(&self, addr: usize, size: usize) -> bool {
        if let Some((&lo_addr, &lo_size)) = self.blocks.range(..=addr).next_back() {
            if lo_addr + lo_size > addr {
                return true;
            }
        }
        self.blocks.range(addr..addr + size).next().is_some()
    }

    /// Number of free blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the table holds no free blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sum of all free block sizes
    pub fn total_free(&self) -> usize {
        self.blocks.values().sum()
    }

    /// Size of the largest free block, or 0 when empty
    pub fn largest_free(&self) -> usize {
        self.blocks.values().copied().max().unwrap_or(0)
    }

    /// Iterate blocks as `(addr, size)` in ascending address order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.blocks.iter().map(|(&addr, &size)| (addr, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// No two blocks adjacent, no two blocks overlapping.
    fn assert_coalesced(table: &FreeBlockTable) {
        let blocks: Vec<_> = table.iter().collect();
        for pair in blocks.windows(2) {
            let (lo_addr, lo_size) = pair[0];
            let (hi_addr, _) = pair[1];
            assert!(
                lo_addr + lo_size < hi_addr,
                "blocks ({lo_addr}, {lo_size}) and ({hi_addr}, ..) touch or overlap"
            );
        }
    }

    #[test]
    fn test_find_fit_prefers_lowest_address() {
        let mut table = FreeBlockTable::new();
        table.insert(64, 32);
        table.insert(0, 32);
        table.insert(128, 32);

        // All three fit; the lowest address wins.
        assert_eq!(table.find_fit(16), Some(0));
        assert_eq!(table.find_fit(32), Some(0));
    }

    #[test]
    fn test_find_fit_skips_small_blocks() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 8);
        table.insert(16, 64);

        assert_eq!(table.find_fit(32), Some(16));
        assert_eq!(table.find_fit(128), None);
    }

    #[test]
    fn test_consume_exact_removes_entry() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 32);
        table.consume(0, 32);
        assert!(table.is_empty());
    }

    #[test]
    fn test_consume_partial_keeps_remainder() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 32);
        table.consume(0, 8);

        let blocks: Vec<_> = table.iter().collect();
        assert_eq!(blocks, vec![(8, 24)]);
    }

    #[test]
    fn test_insert_merges_lower_neighbor() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 16);
        table.insert(16, 8);

        assert_eq!(table.iter().collect::<Vec<_>>(), vec![(0, 24)]);
        assert_coalesced(&table);
    }

    #[test]
    fn test_insert_merges_upper_neighbor() {
        let mut table = FreeBlockTable::new();
        table.insert(24, 8);
        table.insert(16, 8);

        assert_eq!(table.iter().collect::<Vec<_>>(), vec![(16, 16)]);
        assert_coalesced(&table);
    }

    #[test]
    fn test_insert_merges_both_neighbors() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 16);
        table.insert(24, 8);
        table.insert(16, 8);

        assert_eq!(table.iter().collect::<Vec<_>>(), vec![(0, 32)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.total_free(), 32);
    }

    #[test]
    fn test_insert_without_neighbors_stays_separate() {
        let mut table = FreeBlockTable::new();
        table.insert(0, 8);
        table.insert(32, 8);

        assert_eq!(table.len(), 2);
        assert_coalesced(&table);
    }

    #[test]
    fn test_overlaps_detects_double_free() {
        let mut table = FreeBlockTable::new();
        table.insert(16, 32);

        // Exact, partial and enclosing overlaps are all caught.
        assert!(table.overlaps(16, 32));
        assert!(table.overlaps(24, 8));
        assert!(table.overlaps(40, 16));
        assert!(table.overlaps(0, 17));
        assert!(table.overlaps(0, 64));

        // Touching ranges do not overlap.
        assert!(!table.overlaps(0, 16));
        assert!(!table.overlaps(48, 8));
    }

    #[test]
    fn test_largest_free() {
        let mut table = FreeBlockTable::new();
        assert_eq!(table.largest_free(), 0);

        table.insert(0, 8);
        table.insert(32, 64);
        assert_eq!(table.largest_free(), 64);
    }
}
