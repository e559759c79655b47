//! Offset-space memory management for graph construction
//!
//! This module implements the plan-then-materialize arena pattern: graph
//! construction simulates its whole allocation sequence against a logical
//! address space, and a single physical buffer sized to the observed peak
//! is created only once planning is done.
//!
//! # Pattern
//!
//! 1. `alloc`/`free` byte offsets while building the graph
//! 2. Freed ranges are reused first-fit and eagerly coalesced
//! 3. `get_ptr()` materializes one buffer of exactly `peak` bytes
//! 4. Callers place tensors at `base + offset`

pub mod arena;
pub mod calculator;
pub mod free_list;

pub use arena::{ArenaInfo, ArenaStats, OffsetArena};
pub use calculator::MemoryCalculator;
pub use free_list::FreeBlockTable;
