//! Error types for frame and header parsing.

use thiserror::Error;

/// Header-level parse failures.
///
/// These never cross stage boundaries: every stage recovers locally
/// (drop the unit, bump a counter, resync) and downstream consumers only
/// observe the absence of an emission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Sync byte or magic did not match.
    #[error("bad sync or magic")]
    BadSync,

    /// Input shorter than the fixed header.
    #[error("truncated input: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    /// A length field points outside the available data.
    #[error("invalid length field: {0}")]
    InvalidLength(usize),

    /// A checksum did not verify.
    #[error("CRC mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },

    /// A field carried a value outside its permitted range.
    #[error("field out of range")]
    OutOfRange,
}
