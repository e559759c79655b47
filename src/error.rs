//! Unified error handling for tensormem
//!
//! This module provides a centralized error type for the offset allocator
//! and its runtime collaborator. It implements error categorization for:
//! - User errors (bad configuration, actionable by callers)
//! - Internal errors (contract violations, bugs in the calling code)
//! - Resource errors (backing storage exhaustion)

use std::fmt;

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for tensormem
///
/// Every error here is surfaced immediately and loudly. There is no internal
/// retry: the `Internal` category in particular marks the arena instance as
/// unusable, since its address-space bookkeeping can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum TensorMemError {
    // ========== Lifecycle Errors ==========
    /// alloc/free called after the arena was materialized
    #[error("arena phase violation: {0}")]
    PhaseViolation(String),

    // ========== Address-Space Errors ==========
    /// free() called with a range never handed out by alloc()
    #[error(
        "invalid free: range [{addr}, {}) exceeds the planned extent ({extent}) or was already free",
        .addr.saturating_add(*.size)
    )]
    InvalidFree {
        /// Byte offset passed to free()
        addr: usize,
        /// Aligned size passed to free()
        size: usize,
        /// End of the planned address space at the time of the call
        extent: usize,
    },

    // ========== Runtime Errors ==========
    /// The runtime collaborator could not supply the backing buffer
    #[error("backing allocation failed: {0}")]
    BackingAllocationFailed(String),

    // ========== Configuration Errors ==========
    /// Invalid arena configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl TensorMemError {
    /// Categorize the error for handling decisions
    ///
    /// Returns the error category, which can be used to determine
    /// whether an error is a caller bug, a resource condition, or
    /// bad configuration.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TensorMemError::PhaseViolation(_) | TensorMemError::InvalidFree { .. } => {
                ErrorCategory::Internal
            }
            TensorMemError::BackingAllocationFailed(_) => ErrorCategory::Resource,
            TensorMemError::InvalidConfiguration(_) => ErrorCategory::User,
        }
    }

    /// Whether the arena that produced this error can still be used
    ///
    /// Address-space contract violations corrupt the bookkeeping invariants
    /// relied on by every subsequent call, so they are fatal for the
    /// instance. A failed backing allocation leaves the arena in its
    /// planning state and a later retry is permitted.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-supplied configuration is wrong
    User,
    /// Contract violation; a bug in the calling code
    Internal,
    /// Backing storage could not be obtained
    Resource,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "user"),
            ErrorCategory::Internal => write!(f, "internal"),
            ErrorCategory::Resource => write!(f, "resource"),
        }
    }
}

/// Result alias used throughout the crate
pub type MemResult<T> = Result<T, TensorMemError>;
