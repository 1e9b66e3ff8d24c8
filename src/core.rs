//! Core error and result types for the orbit-solver library.
//!
//! All errors use the `thiserror` crate for automatic trait implementations.
//! The taxonomy is flat: every failure the core can surface is a variant of
//! [`OrbitError`], and the caller (typically the outer optimization loop)
//! decides whether to retry with adjusted damping or abort.

use crate::lie::GroupVariant;
use thiserror::Error;

/// Main result type used throughout the orbit-solver library.
pub type OrbitResult<T> = Result<T, OrbitError>;

/// Main error type for the orbit-solver library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrbitError {
    /// Malformed tensor dimensions (wrong buffer length, batch or width).
    #[error("shape error: {0}")]
    Shape(String),

    /// Mixed group variants in a binary operation.
    #[error("group variant mismatch: expected {expected}, got {actual}")]
    VariantMismatch {
        expected: GroupVariant,
        actual: GroupVariant,
    },

    /// The requested compute device is not available in this build.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The requested backing solver cannot be loaded.
    #[error("solver backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A numeric solve was attempted against an outdated symbolic
    /// decomposition.
    #[error("stale sparse structure: {0}")]
    StaleStructure(String),

    /// The damped normal equations were not positive definite, or the
    /// factorization failed numerically.
    #[error("linear solve failed: {0}")]
    SolveFailure(String),

    /// Invalid registry input (bad variable index, inconsistent residual
    /// layout, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
