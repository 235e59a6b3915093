//! # Error types

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the motion detection pipeline.
///
/// None of these are fatal to the process. The owning operation returns them one level up and
/// the caller decides whether to skip the frame or retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid geometry, macroblock or resolution combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A working buffer could not be reserved.
    #[error("failed to allocate buffer of {len} elements")]
    Allocation { len: usize },

    /// The external frame decoder reported a failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// A plane did not match the size the operation was configured for.
    #[error("dimension mismatch: expected {expected:?}, found {found:?}")]
    Dimension {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// Convolution kernel or buffer is unusable.
    #[error("invalid kernel: {0}")]
    Kernel(String),
}
