//! Runtime collaborator for physical buffer allocation
//!
//! The arena does all of its bookkeeping against a logical address space and
//! only touches real memory through this module. A `TensorRuntime` hands out
//! raw buffers and takes them back; the enclosing session owns the runtime
//! and shares it with every arena via `Arc`.
//!
//! # Contract
//!
//! - `alloc(bytes)` returns a non-null pointer to at least `bytes` bytes, or
//!   fails with `BackingAllocationFailed`.
//! - `dealloc(ptr)` is called exactly once per successful `alloc`, from the
//!   arena's teardown, if and only if a buffer was materialized.

use std::alloc::Layout;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::{MemResult, TensorMemError};

/// Physical allocation capability consumed by the arena
///
/// Implementations cover host memory ([`HostRuntime`]) and, in the larger
/// system, device backends. The arena never inspects the pointed-to bytes;
/// it only stores the pointer and returns it from `get_ptr()`.
pub trait TensorRuntime: Send + Sync {
    /// Allocate exactly `bytes` bytes of physical storage
    fn alloc(&self, bytes: usize) -> MemResult<NonNull<u8>>;

    /// Release storage previously returned by `alloc`
    fn dealloc(&self, ptr: NonNull<u8>);
}

/// Heap-backed runtime over `std::alloc`
///
/// Layouts are tracked internally so `dealloc` needs only the pointer,
/// matching the collaborator contract. A zero-byte request maps to a minimal
/// aligned layout so an arena that never allocated anything still gets a
/// valid, deallocatable pointer back from `get_ptr()`.
#[derive(Debug, Default)]
pub struct HostRuntime {
    live: Mutex<HashMap<usize, Layout>>,
}

impl HostRuntime {
    /// Alignment of every buffer handed out by this runtime
    pub const BUFFER_ALIGNMENT: usize = std::mem::size_of::<u64>();

    /// Create a new host runtime with no live buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently allocated and not yet released
    pub fn live_buffers(&self) -> usize {
        self.live.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl TensorRuntime for HostRuntime {
    fn alloc(&self, bytes: usize) -> MemResult<NonNull<u8>> {
        let layout = Layout::from_size_align(bytes.max(1), Self::BUFFER_ALIGNMENT)
            .map_err(|e| TensorMemError::BackingAllocationFailed(e.to_string()))?;

        // SAFETY: layout has non-zero size and a valid power-of-two alignment.
        let raw = unsafe { std::alloc::alloc(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            TensorMemError::BackingAllocationFailed(format!(
                "host allocation of {} bytes returned null",
                bytes
            ))
        })?;

        if let Ok(mut live) = self.live.lock() {
            live.insert(ptr.as_ptr() as usize, layout);
        }
        tracing::trace!(bytes, ptr = ?ptr.as_ptr(), "host runtime allocated buffer");
        Ok(ptr)
    }

    fn dealloc(&self, ptr: NonNull<u8>) {
        let layout = self
            .live
            .lock()
            .ok()
            .and_then(|mut live| live.remove(&(ptr.as_ptr() as usize)));

        match layout {
            Some(layout) => {
                // SAFETY: ptr was returned by alloc() with exactly this layout
                // and is removed from the live map before being freed.
                unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
                tracing::trace!(ptr = ?ptr.as_ptr(), "host runtime released buffer");
            }
            None => {
                tracing::error!(
                    ptr = ?ptr.as_ptr(),
                    "dealloc of pointer not owned by this runtime; leaking"
                );
            }
        }
    }
}
