//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire protocol structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes are available to decode the next item.
    ///
    /// Stream decoders treat this as "wait for more data", never as a
    /// fatal condition.
    #[error("incomplete data: needed {needed} bytes, {available} available")]
    Incomplete {
        /// Bytes required to make progress.
        needed: usize,
        /// Bytes currently available.
        available: usize,
    },

    /// The operation code is not known to this client.
    #[error("unknown operation code {0}")]
    UnknownOperation(i32),

    /// The operation code is known but not valid at this point.
    #[error("unexpected operation {0} in server reply")]
    UnexpectedOperation(i32),

    /// A column type cannot be described in BLR or staged for I/O.
    #[error("unsupported column type {type_tag} (error code {code})")]
    UnsupportedColumnType {
        /// The raw type tag including the nullable bit.
        type_tag: i32,
        /// Matching server diagnostic code.
        code: i32,
    },

    /// A length field holds a value that cannot be valid.
    #[error("invalid length {0}")]
    InvalidLength(i32),

    /// A structured buffer (parameter, info or event buffer) is malformed.
    #[error("invalid buffer: {0}")]
    InvalidBuffer(&'static str),

    /// A value is too long to fit its length prefix.
    #[error("value of {length} bytes exceeds the maximum of {max}")]
    ValueTooLong {
        /// Actual length.
        length: usize,
        /// Largest length the encoding permits.
        max: usize,
    },

    /// The server answered the protocol negotiation with an unknown version.
    #[error("unsupported protocol version {0:#x}")]
    UnsupportedVersion(i32),
}

impl ProtocolError {
    /// Build an [`ProtocolError::Incomplete`] for a buffer that is short.
    #[must_use]
    pub const fn incomplete(needed: usize, available: usize) -> Self {
        Self::Incomplete { needed, available }
    }

    /// Whether the error only means more input is required.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }
}
