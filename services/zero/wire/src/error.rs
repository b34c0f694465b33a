//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding Zero elements and frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZeroError {
    /// Buffer shorter than the minimum message size
    #[error("buffer too short: {0} bytes")]
    TooShort(usize),

    /// Buffer ended before a value could be read
    #[error("truncated buffer: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the value being read
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Declared length or count was negative
    #[error("negative length {0}")]
    NegativeLength(i32),

    /// Declared length or count exceeds the bytes left in the buffer
    #[error("declared length {declared} exceeds {remaining} remaining bytes")]
    LengthOverflow {
        /// Length (in bytes) implied by the declared value
        declared: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Unknown type tag
    #[error("unknown type {0}")]
    UnknownType(u8),

    /// A composite boundary carried the wrong tag
    #[error("unexpected type {found}, expected {expected}")]
    UnexpectedType {
        /// Tag that was required
        expected: u8,
        /// Tag that was read
        found: u8,
    },

    /// Boolean byte other than 0 or 1
    #[error("invalid boolean byte {0}")]
    InvalidBoolean(u8),

    /// String bytes were not valid UTF-8
    #[error("invalid utf-8 string")]
    InvalidUtf8,

    /// Map carried the same key twice
    #[error("duplicate map key {0:?}")]
    DuplicateKey(String),

    /// Nested composites went deeper than the decoder allows
    #[error("nesting depth exceeded: {0}")]
    DepthExceeded(usize),

    /// Bytes left over after a complete top-level message
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Top-level element was not a map or an array
    #[error("not a message: top-level type {0}")]
    NotMessage(u8),

    /// Value too large for its length prefix
    #[error("value too large to encode: {0} items")]
    Oversized(usize),

    /// Frame header without the counting flag
    #[error("frame header {0:#04x} lacks data counting")]
    Uncounted(u8),

    /// Frame larger than the configured limit
    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Configured maximum
        limit: usize,
    },

    /// Frame flagged compressed or encrypted without a matching hook
    #[error("no {0} hook configured")]
    MissingHook(&'static str),

    /// Compression or encryption hook failed
    #[error("{0} hook failed")]
    Hook(&'static str),
}
