//! Error types for the reconstruction core
//!
//! Every fallible operation returns [`ReconResult`]. Errors are never
//! recovered at the point of detection: the requested operation is aborted
//! and no partially filled volume is handed back to the caller.

use thiserror::Error;

use crate::volume::{Dims, VolumeKind};

/// Convenience alias for results using the crate error type.
pub type ReconResult<T> = std::result::Result<T, ReconError>;

/// Primary error type of the reconstruction core.
#[derive(Error, Debug)]
pub enum ReconError {
    /// Invalid dimensions or sizing parameters, element-count overflow,
    /// or the allocator refused the request.
    #[error("allocation failed: {reason}")]
    Allocation { reason: String },

    /// A buffer's shape disagrees with what the operation was told to expect.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: Dims, actual: Dims },

    /// A buffer holds the wrong element kind for the requested operation.
    #[error("volume kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: VolumeKind,
        actual: VolumeKind,
    },

    /// An axis length the transform policy refuses to plan.
    #[error("transform unsupported on axis {axis}: length {len} has prime factor {factor}")]
    TransformUnsupported {
        axis: char,
        len: usize,
        factor: usize,
    },

    /// An index past the end of a sequence level
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// Semantically invalid settings (parsed fine, but out of range).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconError {
    pub(crate) fn allocation(reason: impl Into<String>) -> Self {
        ReconError::Allocation {
            reason: reason.into(),
        }
    }
}
