//! Memory requirements calculator for graph planning
//!
//! Utilities to total the byte requirements of a set of named tensors
//! before any offsets are handed out. This enables:
//! - Pre-flight sizing (log the working set before planning starts)
//! - Driving the arena: `assign` turns the plan into actual offsets

use crate::error::{MemResult, TensorMemError};
use crate::memory::arena::OffsetArena;

/// Accumulates aligned byte requirements for named tensors
///
/// Sizes are rounded up with the same unit the arena uses, so `total_bytes`
/// equals the arena's peak when every tensor is live at once.
///
/// # Example
/// ```ignore
/// let mut calc = MemoryCalculator::new();
/// calc.add_tensor("embeddings".to_string(), 32000 * 512, 4);
/// calc.add_tensor("layer.0.weight".to_string(), 512 * 512, 4);
/// tracing::info!("plan needs {} bytes", calc.total_bytes());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryCalculator {
    tensor_sizes: Vec<(String, usize)>,
    alignment: usize,
}

impl MemoryCalculator {
    /// Create a calculator using the arena's default alignment
    pub fn new() -> Self {
        Self {
            tensor_sizes: Vec::new(),
            alignment: OffsetArena::DEFAULT_ALIGNMENT,
        }
    }

    /// Create a calculator with a custom alignment unit
    ///
    /// # Errors
    /// `InvalidConfiguration` if `alignment` is zero or not a power of two,
    /// the same rule the arena enforces.
    pub fn with_alignment(alignment: usize) -> MemResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(TensorMemError::InvalidConfiguration(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        Ok(Self {
            tensor_sizes: Vec::new(),
            alignment,
        })
    }

    /// Add a tensor to the plan
    ///
    /// # Arguments
    /// * `name` - Tensor name (for diagnostics and `assign` results)
    /// * `element_count` - Number of elements in the tensor
    /// * `element_size` - Size of each element in bytes (e.g. 4 for f32)
    ///
    /// The byte count is aligned the same way the arena aligns requests,
    /// so the plan matches what allocation will actually consume.
    pub fn add_tensor(&mut self, name: String, element_count: usize, element_size: usize) {
        let bytes = element_count.saturating_mul(element_size);
        let aligned = bytes.saturating_add(self.alignment - 1) & !(self.alignment - 1);
        self.tensor_sizes.push((name, aligned));
    }

    /// Total aligned bytes needed when every tensor is live at once
    pub fn total_bytes(&self) -> usize {
        self.tensor_sizes.iter().map(|(_, size)| size).sum()
    }

    /// Number of tensors in the plan
    pub fn tensor_count(&self) -> usize {
        self.tensor_sizes.len()
    }

    /// Individual aligned tensor sizes, in insertion order
    pub fn tensor_sizes(&self) -> &[(String, usize)] {
        &self.tensor_sizes
    }

    /// Allocate every planned tensor from the arena
    ///
    /// Returns `(name, offset)` pairs in insertion order. Offsets become
    /// valid tensor locations once the arena is materialized and callers
    /// add them to the base pointer.
    ///
    /// # Errors
    /// `PhaseViolation` if the arena is already materialized.
    pub fn assign(&self, arena: &mut OffsetArena) -> MemResult<Vec<(String, usize)>> {
        let mut offsets = Vec::with_capacity(self.tensor_sizes.len());
        for (name, size) in &self.tensor_sizes {
            let addr = arena.alloc(*size)?;
            tracing::trace!(tensor = name.as_str(), addr, size, "assigned tensor offset");
            offsets.push((name.clone(), addr));
        }
        Ok(offsets)
    }
}
