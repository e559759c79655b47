//! Plan-then-materialize offset arena for tensor storage
//!
//! The arena hands out byte offsets inside a single logical address space
//! while a compute graph is being built, and defers the one real allocation
//! until the graph's memory shape is known. Graph construction drives
//! `alloc`/`free` to simulate the whole tensor lifetime sequence; the
//! high-water mark of that simulation becomes the size of the physical
//! buffer requested from the runtime inside `get_ptr()`.
//!
//! # Lifecycle
//!
//! Two phases, one-way:
//!
//! - **Planning**: `alloc` and `free` are legal, no physical memory exists.
//! - **Materialized**: entered by the first `get_ptr()` call; `alloc` and
//!   `free` become phase violations, `get_ptr()` keeps returning the same
//!   pointer without reallocating.
//!
//! Callers add the offsets from `alloc` to the materialized base pointer to
//! locate tensor data; that addition is outside the arena's contract.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{MemResult, TensorMemError};
use crate::memory::free_list::FreeBlockTable;
use crate::runtime::TensorRuntime;

/// Offset allocator over a logical `[0, peak)` address space
///
/// Requests are rounded up to the arena's alignment unit, served first-fit
/// from reclaimed blocks, and bump-allocated past the planned extent
/// otherwise. There is no capacity bound during planning; the limit is
/// enforced only when the backing buffer is sized to `peak`.
///
/// The arena exclusively owns its bookkeeping and at most one physical
/// buffer, released through the runtime on drop. The runtime itself is a
/// shared capability owned by the enclosing session.
pub struct OffsetArena {
    runtime: Arc<dyn TensorRuntime>,
    /// Power-of-two alignment unit applied to every request size
    alignment: usize,
    /// Bytes currently allocated (aligned sizes)
    used: usize,
    /// High-water mark of `used`; size of the buffer once materialized
    peak: usize,
    /// Reclaimed, reusable logical ranges
    free_blocks: FreeBlockTable,
    /// Physical buffer, absent until `get_ptr()`
    buffer: Option<NonNull<u8>>,
}

impl OffsetArena {
    /// Default alignment unit
    ///
    /// The width of the widest scalar type the runtime supports, so any
    /// tensor element type can start at any offset the arena hands out.
    pub const DEFAULT_ALIGNMENT: usize = std::mem::size_of::<u64>();

    /// Create an arena with the default alignment
    pub fn new(runtime: Arc<dyn TensorRuntime>) -> Self {
        // DEFAULT_ALIGNMENT is a power of two; with_alignment cannot fail.
        Self::with_alignment(runtime, Self::DEFAULT_ALIGNMENT)
            .unwrap_or_else(|_| unreachable!("default alignment is a power of two"))
    }

    /// Create an arena with a custom alignment unit
    ///
    /// # Errors
    /// `InvalidConfiguration` if `alignment` is zero or not a power of two.
    pub fn with_alignment(runtime: Arc<dyn TensorRuntime>, alignment: usize) -> MemResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(TensorMemError::InvalidConfiguration(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        tracing::debug!(alignment, "offset arena created");
        Ok(Self {
            runtime,
            alignment,
            used: 0,
            peak: 0,
            free_blocks: FreeBlockTable::new(),
            buffer: None,
        })
    }

    /// Round a request size up to the alignment unit
    ///
    /// Idempotent; `aligned_size(0) == 0`. Sizes within one alignment unit
    /// of `usize::MAX` saturate to the largest aligned value instead of
    /// wrapping.
    pub fn aligned_size(&self, size: usize) -> usize {
        size.saturating_add(self.alignment - 1) & !(self.alignment - 1)
    }

    /// Reserve an aligned byte range and return its offset
    ///
    /// First-fit over the free table, lowest address first; falls back to
    /// bump allocation at the end of the planned extent. The returned range
    /// overlaps neither a live allocation nor a free block.
    ///
    /// # Errors
    /// `PhaseViolation` once the arena is materialized.
    pub fn alloc(&mut self, size: usize) -> MemResult<usize> {
        self.ensure_planning("alloc")?;
        let size = self.aligned_size(size);
        if size == 0 {
            // Degenerate zero-length request; never touches the free table.
            return Ok(self.used);
        }

        let addr = match self.free_blocks.find_fit(size) {
            Some(addr) => {
                self.free_blocks.consume(addr, size);
                addr
            }
            // Live and free ranges tile [0, extent); bumping at the extent
            // end is the only fresh address that cannot overlap either set.
            None => self.extent(),
        };

        self.used += size;
        self.peak = self.peak.max(addr + size);

        tracing::trace!(addr, size, used = self.used, "arena alloc");
        Ok(addr)
    }

    /// Return a previously allocated range to the free table
    ///
    /// The freed range is immediately merged with any address-adjacent free
    /// blocks and becomes eligible for reuse by later `alloc` calls.
    ///
    /// # Errors
    /// - `PhaseViolation` once the arena is materialized.
    /// - `InvalidFree` if the aligned range reaches past the planned extent
    ///   or overlaps a block that is already free. Such an error is fatal
    ///   for the arena: its bookkeeping can no longer be trusted.
    pub fn free(&mut self, addr: usize, size: usize) -> MemResult<()> {
        self.ensure_planning("free")?;
        let size = self.aligned_size(size);

        let in_bounds = addr
            .checked_add(size)
            .map_or(false, |end| end <= self.extent());
        if !in_bounds || self.free_blocks.overlaps(addr, size) {
            return Err(TensorMemError::InvalidFree {
                addr,
                size,
                extent: self.extent(),
            });
        }
        if size == 0 {
            return Ok(());
        }

        self.used -= size;
        self.free_blocks.insert(addr, size);

        tracing::trace!(addr, size, used = self.used, "arena free");
        Ok(())
    }

    /// Materialize the backing buffer and return its base pointer
    ///
    /// The first call requests exactly `peak` bytes from the runtime and
    /// transitions the arena out of planning. Every later call returns the
    /// identical pointer with no further runtime traffic.
    ///
    /// # Errors
    /// `BackingAllocationFailed` if the runtime cannot supply `peak` bytes.
    /// The arena then remains in planning, holding no partial buffer.
    pub fn get_ptr(&mut self) -> MemResult<NonNull<u8>> {
        if let Some(ptr) = self.buffer {
            return Ok(ptr);
        }
        let ptr = self.runtime.alloc(self.peak)?;
        self.buffer = Some(ptr);
        tracing::info!(peak = self.peak, "arena materialized backing buffer");
        Ok(ptr)
    }

    /// Discard all planning state except the high-water mark
    ///
    /// Lets one arena re-plan another graph while remembering the largest
    /// working set it has ever seen; `peak` stays monotone across resets.
    ///
    /// # Errors
    /// `PhaseViolation` once the arena is materialized.
    pub fn reset(&mut self) -> MemResult<()> {
        self.ensure_planning("reset")?;
        self.used = 0;
        self.free_blocks = FreeBlockTable::new();
        tracing::debug!(peak = self.peak, "arena reset");
        Ok(())
    }

    /// Whether the backing buffer has been materialized
    pub fn is_materialized(&self) -> bool {
        self.buffer.is_some()
    }

    /// Read-only snapshot of `used` and `peak`
    pub fn info(&self) -> ArenaInfo {
        ArenaInfo {
            used: self.used,
            peak: self.peak,
        }
    }

    /// Fragmentation diagnostics over the free table
    pub fn stats(&self) -> ArenaStats {
        let free_bytes = self.free_blocks.total_free();
        let largest_free = self.free_blocks.largest_free();
        let fragmentation = if free_bytes == 0 {
            0.0
        } else {
            1.0 - (largest_free as f64 / free_bytes as f64)
        };
        ArenaStats {
            used: self.used,
            peak: self.peak,
            free_bytes,
            largest_free,
            fragment_count: self.free_blocks.len(),
            fragmentation,
        }
    }

    /// Free blocks as `(addr, size)` in address order, for diagnostics
    pub fn free_blocks(&self) -> Vec<(usize, usize)> {
        self.free_blocks.iter().collect()
    }

    /// End of the planned address space: live and free ranges tile
    /// `[0, extent)` exactly, so this is where bump allocation continues.
    fn extent(&self) -> usize {
        self.used + self.free_blocks.total_free()
    }

    fn ensure_planning(&self, op: &str) -> MemResult<()> {
        if self.buffer.is_some() {
            return Err(TensorMemError::PhaseViolation(format!(
                "{} called after the backing buffer was materialized",
                op
            )));
        }
        Ok(())
    }
}

impl Drop for OffsetArena {
    fn drop(&mut self) {
        if let Some(ptr) = self.buffer.take() {
            self.runtime.dealloc(ptr);
        }
    }
}

impl fmt::Debug for OffsetArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetArena")
            .field("alignment", &self.alignment)
            .field("used", &self.used)
            .field("peak", &self.peak)
            .field("free_blocks", &self.free_blocks)
            .field("materialized", &self.buffer.is_some())
            .finish()
    }
}

/// Snapshot of arena usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaInfo {
    /// Bytes currently allocated (aligned sizes)
    pub used: usize,
    /// High-water mark of `used`
    pub peak: usize,
}

impl fmt::Display for ArenaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "used memory: {}, peak memory: {}", self.used, self.peak)
    }
}

/// Fragmentation diagnostics for the free table
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    /// Bytes currently allocated
    pub used: usize,
    /// High-water mark of `used`
    pub peak: usize,
    /// Sum of all free block sizes
    pub free_bytes: usize,
    /// Size of the largest free block
    pub largest_free: usize,
    /// Number of free blocks
    pub fragment_count: usize,
    /// 0.0 = one contiguous free block, approaching 1.0 = fully scattered
    pub fragmentation: f64,
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArenaStats: used={}B peak={}B free={}B in {} fragments (largest {}B, fragmentation {:.2})",
            self.used,
            self.peak,
            self.free_bytes,
            self.fragment_count,
            self.largest_free,
            self.fragmentation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HostRuntime;

    fn arena() -> OffsetArena {
        OffsetArena::new(Arc::new(HostRuntime::new()))
    }

    #[test]
    fn test_aligned_size() {
        let arena = arena();
        assert_eq!(arena.aligned_size(0), 0);
        assert_eq!(arena.aligned_size(1), 8);
        assert_eq!(arena.aligned_size(8), 8);
        assert_eq!(arena.aligned_size(9), 16);
        assert_eq!(arena.aligned_size(10), 16);
        assert_eq!(arena.aligned_size(20), 24);
    }

    #[test]
    fn test_aligned_size_saturates_at_address_space_end() {
        let arena = arena();
        let top = usize::MAX & !7;
        assert_eq!(arena.aligned_size(usize::MAX), top);
        assert_eq!(arena.aligned_size(usize::MAX - 3), top);
        assert_eq!(arena.aligned_size(top), top);
    }

    #[test]
    fn test_aligned_size_idempotent() {
        let arena = arena();
        for size in [0, 1, 7, 8, 9, 100, 1000, 4097] {
            let once = arena.aligned_size(size);
            assert_eq!(arena.aligned_size(once), once);
            assert!(once >= size);
        }
    }

    #[test]
    fn test_alignment_must_be_power_of_two() {
        let runtime: Arc<dyn TensorRuntime> = Arc::new(HostRuntime::new());
        assert!(OffsetArena::with_alignment(runtime.clone(), 0).is_err());
        assert!(OffsetArena::with_alignment(runtime.clone(), 12).is_err());
        assert!(OffsetArena::with_alignment(runtime, 256).is_ok());
    }

    #[test]
    fn test_bump_allocation_is_prefix_sums() {
        let mut arena = arena();
        assert_eq!(arena.alloc(10).unwrap(), 0);
        assert_eq!(arena.alloc(20).unwrap(), 16);
        assert_eq!(arena.alloc(8).unwrap(), 40);
        let info = arena.info();
        assert_eq!(info.used, 48);
        assert_eq!(info.peak, 48);
    }

    #[test]
    fn test_free_and_reuse_first_fit() {
        let mut arena = arena();
        let a = arena.alloc(10).unwrap(); // [0, 16)
        let _b = arena.alloc(20).unwrap(); // [16, 40)
        arena.free(a, 10).unwrap(); // free table {0: 16}
        assert_eq!(arena.info().used, 24);

        // Fits in the freed block; the remainder stays free.
        assert_eq!(arena.alloc(8).unwrap(), 0);
        assert_eq!(arena.free_blocks(), vec![(8, 8)]);
        assert_eq!(arena.info().used, 32);
    }

    #[test]
    fn test_free_coalesces_adjacent_blocks() {
        let mut arena = arena();
        let a = arena.alloc(10).unwrap(); // [0, 16)
        let b = arena.alloc(20).unwrap(); // [16, 40)
        arena.free(a, 10).unwrap();

        assert_eq!(arena.alloc(8).unwrap(), 0); // splits {0:16} -> {8:8}
        arena.free(0, 8).unwrap(); // {0:8} + {8:8} -> {0:16}
        arena.free(b, 20).unwrap(); // {0:16} + {16:24} -> {0:40}

        assert_eq!(arena.free_blocks(), vec![(0, 40)]);
        assert_eq!(arena.info().used, 0);
        assert_eq!(arena.info().peak, 40);
    }

    #[test]
    fn test_too_large_request_ignores_small_free_blocks() {
        let mut arena = arena();
        let a = arena.alloc(8).unwrap();
        let _b = arena.alloc(64).unwrap();
        arena.free(a, 8).unwrap();

        // 32 > 8, so the free block at 0 is skipped and the arena bumps.
        assert_eq!(arena.alloc(32).unwrap(), 72);
        assert_eq!(arena.free_blocks(), vec![(0, 8)]);
    }

    #[test]
    fn test_invalid_free_past_extent() {
        let mut arena = arena();
        arena.alloc(16).unwrap();
        let err = arena.free(8, 16).unwrap_err();
        assert!(matches!(err, TensorMemError::InvalidFree { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_free_at_address_space_end_reports_cleanly() {
        let mut arena = arena();
        arena.alloc(16).unwrap();

        // The range end overflows usize; the error must both trigger and
        // format without panicking.
        let err = arena.free(usize::MAX - 4, 16).unwrap_err();
        assert!(matches!(err, TensorMemError::InvalidFree { .. }));
        assert!(err.to_string().contains("invalid free"));
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut arena = arena();
        let a = arena.alloc(16).unwrap();
        let _b = arena.alloc(16).unwrap();
        arena.free(a, 16).unwrap();
        let err = arena.free(a, 16).unwrap_err();
        assert!(matches!(err, TensorMemError::InvalidFree { .. }));
    }

    #[test]
    fn test_alloc_after_materialize_is_phase_violation() {
        let mut arena = arena();
        arena.alloc(32).unwrap();
        arena.get_ptr().unwrap();

        assert!(matches!(
            arena.alloc(8).unwrap_err(),
            TensorMemError::PhaseViolation(_)
        ));
        assert!(matches!(
            arena.free(0, 8).unwrap_err(),
            TensorMemError::PhaseViolation(_)
        ));
        assert!(matches!(
            arena.reset().unwrap_err(),
            TensorMemError::PhaseViolation(_)
        ));
    }

    #[test]
    fn test_get_ptr_is_idempotent() {
        let mut arena = arena();
        arena.alloc(128).unwrap();
        let first = arena.get_ptr().unwrap();
        let second = arena.get_ptr().unwrap();
        assert_eq!(first, second);
        assert!(arena.is_materialized());
    }

    #[test]
    fn test_peak_tracks_high_water_not_current_use() {
        let mut arena = arena();
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        arena.free(a, 64).unwrap();
        arena.free(b, 64).unwrap();
        assert_eq!(arena.info().used, 0);
        assert_eq!(arena.info().peak, 128);

        // Replanning reuses the freed space without raising the peak.
        let c = arena.alloc(128).unwrap();
        assert_eq!(c, 0);
        assert_eq!(arena.info().peak, 128);
    }

    #[test]
    fn test_reset_keeps_peak() {
        let mut arena = arena();
        arena.alloc(100).unwrap();
        arena.reset().unwrap();
        assert_eq!(arena.info().used, 0);
        assert_eq!(arena.info().peak, 104);
        assert!(arena.free_blocks().is_empty());

        // A smaller second plan does not shrink the remembered peak.
        arena.alloc(8).unwrap();
        assert_eq!(arena.info().peak, 104);
    }

    #[test]
    fn test_stats_report_fragmentation() {
        let mut arena = arena();
        let a = arena.alloc(8).unwrap();
        let _b = arena.alloc(8).unwrap();
        let c = arena.alloc(8).unwrap();
        let _d = arena.alloc(8).unwrap();
        arena.free(a, 8).unwrap();
        arena.free(c, 8).unwrap();

        let stats = arena.stats();
        assert_eq!(stats.fragment_count, 2);
        assert_eq!(stats.free_bytes, 16);
        assert_eq!(stats.largest_free, 8);
        assert!(stats.fragmentation > 0.0);

        let line = stats.to_string();
        assert!(line.contains("2 fragments"));
    }

    #[test]
    fn test_info_display() {
        let mut arena = arena();
        arena.alloc(10).unwrap();
        assert_eq!(arena.info().to_string(), "used memory: 16, peak memory: 16");
    }
}
