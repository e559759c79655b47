//! tensormem - offset allocator core for a tensor-compute runtime
//!
//! Assigns backing-storage offsets to tensors produced and consumed by a
//! compute graph without paying for a real allocation until the graph's
//! memory shape is known. Graph construction drives [`OffsetArena::alloc`]
//! and [`OffsetArena::free`] against a logical address space; the observed
//! high-water mark then sizes the single physical buffer materialized by
//! [`OffsetArena::get_ptr`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tensormem::{HostRuntime, OffsetArena};
//!
//! let runtime = Arc::new(HostRuntime::new());
//! let mut arena = OffsetArena::new(runtime);
//!
//! let a = arena.alloc(10)?; // offset 0, rounded to 16 bytes
//! let b = arena.alloc(20)?; // offset 16
//! arena.free(a, 10)?;       // offset 0 is reusable again
//!
//! let base = arena.get_ptr()?; // one real allocation, sized to the peak
//! let _tensor_b = unsafe { base.as_ptr().add(b) };
//! # Ok::<(), tensormem::TensorMemError>(())
//! ```

pub mod error;
pub mod logging;
pub mod memory;
pub mod runtime;

pub use error::{ErrorCategory, MemResult, TensorMemError};
pub use logging::{init_logging_default, init_with_config, LoggingConfig};
pub use memory::{ArenaInfo, ArenaStats, FreeBlockTable, MemoryCalculator, OffsetArena};
pub use runtime::{HostRuntime, TensorRuntime};
