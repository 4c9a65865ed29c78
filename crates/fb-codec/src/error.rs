//! Codec error types.

use fb_wire::ProtocolError;
use thiserror::Error;

/// Errors raised by the framing layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// IO error on the transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream does not hold a valid message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A message grew beyond the configured limit before completing.
    #[error("message of at least {size} bytes exceeds the maximum of {max}")]
    MessageTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection was aborted locally.
    #[error("connection aborted")]
    Aborted,
}

impl CodecError {
    /// Whether the error means the transport is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed | Self::Aborted)
    }
}
