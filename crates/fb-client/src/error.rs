//! Client error types.

use fb_codec::CodecError;
use fb_wire::codes;
use fb_wire::{Diagnostic, ProtocolError};
use thiserror::Error;

use crate::transaction::TransactionState;

/// An error reported by the server in a status vector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct ServerError {
    diagnostic: Diagnostic,
}

impl ServerError {
    /// Primary ISC error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.diagnostic.code
    }

    /// Every ISC code in the chain, primary first.
    #[must_use]
    pub fn codes(&self) -> &[i32] {
        &self.diagnostic.codes
    }

    /// Whether `code` appears anywhere in the chain.
    #[must_use]
    pub fn has_code(&self, code: i32) -> bool {
        self.diagnostic.codes.contains(&code)
    }

    /// SQLSTATE sent by the server, if any.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        self.diagnostic.sql_state.as_deref()
    }

    /// Interpreted message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.diagnostic.message
    }

    /// The full diagnostic.
    #[must_use]
    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }
}

impl From<Diagnostic> for ServerError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self { diagnostic }
    }
}

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No connection to the server is established.
    #[error("not connected to a server")]
    NotConnected,

    /// The operation requires an attached database.
    #[error("not attached to a database")]
    NotAttached,

    /// The database is already attached.
    #[error("already attached to a database")]
    AlreadyAttached,

    /// The database still has active transactions.
    #[error("{0} active transaction(s) must end before detaching")]
    OpenTransactions(usize),

    /// The operation requires an active transaction.
    #[error("transaction is not active")]
    TransactionNotActive,

    /// The transaction cannot perform the operation in its current state.
    #[error("cannot {operation} a transaction in state {state:?}")]
    TransactionState {
        /// Current state.
        state: TransactionState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// The blob is already open.
    #[error("blob is already open")]
    AlreadyOpen,

    /// The blob is not open.
    #[error("blob is not open")]
    NotOpen,

    /// Output blobs cannot be reopened after close or cancel.
    #[error("output blob cannot be reopened")]
    ReopenNotAllowed,

    /// Writing to an input blob.
    #[error("input blobs do not support writing")]
    WriteNotSupported,

    /// Reading from an output blob.
    #[error("output blobs do not support reading")]
    ReadNotSupported,

    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The feature is not available on this connection.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Server returned an error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Seek on a segmented blob.
    #[error("segmented blobs are not seekable: {0}")]
    SegmentedBlobNotSeekable(ServerError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connection aborted by a cancel request.
    #[error("connection aborted")]
    ConnectionAborted,

    /// TCP connection timed out.
    #[error("connection timed out")]
    ConnectTimeout,

    /// No response within the network read timeout.
    #[error("read timed out")]
    ReadTimeout,

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The event channel is closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Aborted => Self::ConnectionAborted,
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            CodecError::Io(e) => Self::Io(e),
            CodecError::Protocol(e) => Self::Protocol(e),
            other => Self::Codec(other),
        }
    }
}

impl Error {
    /// ISC error code corresponding to this error, when one exists.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        let code = match self {
            Self::Server(e) | Self::SegmentedBlobNotSeekable(e) => e.code(),
            Self::NotConnected | Self::NotAttached | Self::AlreadyAttached => codes::ISC_BAD_DB_HANDLE,
            Self::OpenTransactions(_) => codes::ISC_OPEN_TRANS,
            Self::TransactionNotActive => codes::ISC_SEGSTR_NO_TRANS,
            Self::TransactionState { .. } => codes::ISC_TRA_STATE,
            Self::AlreadyOpen | Self::ReopenNotAllowed => codes::ISC_SEGSTR_NO_OP,
            Self::NotOpen => codes::ISC_BAD_SEGSTR_HANDLE,
            Self::WriteNotSupported => codes::ISC_SEGSTR_NO_WRITE,
            Self::ReadNotSupported => codes::ISC_SEGSTR_NO_READ,
            Self::FeatureNotSupported(_) => codes::ISC_WISH_LIST,
            Self::Io(_) | Self::Codec(_) | Self::ConnectionClosed | Self::ConnectionAborted | Self::ReadTimeout => {
                codes::ISC_NETWORK_ERROR
            }
            Self::ConnectTimeout | Self::Connection(_) => codes::ISC_NET_CONNECT_ERR,
            Self::ChannelClosed => codes::ISC_NET_EVENT_CONNECT_ERR,
            Self::InvalidArgument(_) | Self::Protocol(_) | Self::Config(_) => return None,
        };
        Some(code)
    }

    /// Check if this is a server error carrying `code`.
    #[must_use]
    pub fn is_server_error(&self, code: i32) -> bool {
        matches!(self, Self::Server(e) | Self::SegmentedBlobNotSeekable(e) if e.has_code(code))
    }

    /// Check if the transport failed.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Codec(_)
                | Self::ConnectionClosed
                | Self::ConnectionAborted
                | Self::ConnectTimeout
                | Self::ReadTimeout
                | Self::Connection(_)
        )
    }

    /// Whether the session can no longer be used after this error.
    ///
    /// Protocol errors leave the stream at an unknown position.
    #[must_use]
    pub(crate) fn is_fatal(&self) -> bool {
        self.is_transport_error() || matches!(self, Self::Protocol(_))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
