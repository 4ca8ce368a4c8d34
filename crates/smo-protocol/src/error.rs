//! Codec error types.

use std::io;
use std::str::Utf8Error;

/// Errors produced while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Fewer bytes are available than the structure requires.
    #[error("need {needed} bytes, only {available} available")]
    Incomplete {
        /// Bytes required.
        needed: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// Reading from or writing to the in-memory cursor failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A fixed-size string field did not hold valid UTF-8.
    #[error("invalid string: {0}")]
    InvalidString(#[from] Utf8Error),

    /// A boolean byte was neither 0 nor 1.
    #[error("encountered bad boolean with value {0}")]
    BadBool(u8),

    /// An integer did not map onto a closed enum.
    #[error("encountered invalid enum value for enum {name}: {value}")]
    InvalidEnumValue {
        /// Enum type name.
        name: &'static str,
        /// Raw value read from the wire.
        value: i64,
    },

    /// A bitmask contained bits outside its named flags.
    #[error("encountered bad flags for {name} with value {value:#04x}")]
    BadFlags {
        /// Bitmask type name.
        name: &'static str,
        /// Raw value read from the wire.
        value: u8,
    },

    /// The header's declared size disagrees with the schema's fixed size.
    #[error("{name} body must be {expected} bytes, header declared {actual}")]
    BodySizeMismatch {
        /// Packet type name.
        name: &'static str,
        /// Size the schema requires.
        expected: usize,
        /// Size declared by the header.
        actual: usize,
    },

    /// The encoded body does not fit the header's signed 16-bit size field.
    #[error("body of {0} bytes exceeds the maximum of {max}", max = i16::MAX)]
    BodyTooLarge(usize),

    /// The header declared a negative body size.
    #[error("header declared negative body size {0}")]
    NegativeSize(i16),
}
