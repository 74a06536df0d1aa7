//! Codec and buffer error types.

use crate::buffer::Mode;
use thiserror::Error;

/// Errors raised while encoding into or decoding out of a byte cursor.
///
/// Any of these aborts the current pass. The serializer that produced it
/// refuses further work, and the buffer must be reset before reuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("buffer overflow: needed {needed} bytes, only {written} written")]
    Overflow { needed: usize, written: usize },

    #[error("buffer underrun: needed {needed} bytes, only {read} available")]
    Underrun { needed: usize, read: usize },

    #[error("wrong buffer mode: operation requires {expected:?}, buffer is in {actual:?}")]
    WrongMode { expected: Mode, actual: Mode },

    #[error("length {0} does not fit the 32-bit length prefix")]
    LengthOverflow(usize),

    #[error("length mismatch: expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("unexpected packet type: expected {expected:#x}, got {actual:#x}")]
    UnexpectedType { expected: u32, actual: u32 },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("serializer already failed; reset the buffer before reuse")]
    Poisoned,
}

impl SerializationError {
    /// Returns whether the error came from running out of buffer space or data.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            SerializationError::Overflow { .. } | SerializationError::Underrun { .. }
        )
    }
}
