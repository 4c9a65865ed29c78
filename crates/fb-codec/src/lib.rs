//! # fb-codec
//!
//! Async framing layer for the Firebird wire protocol.
//!
//! This crate turns raw byte streams into decoded server messages and
//! encodes client requests, handling messages split across TCP segment
//! boundaries.
//!
//! ## Architecture
//!
//! ```text
//! TCP Stream → WireCodec → ServerMessage → Database session
//! Aux Stream → EventCodec → ChannelMessage → AsynchronousChannel
//! ```
//!
//! ### Abort Safety
//!
//! [`Connection`] splits the stream into read and write halves. An
//! [`AbortHandle`] taken from it can shut the socket down and wake a task
//! blocked in [`Connection::read_message`], and can send `op_cancel`
//! while a response is outstanding.
//!
//! ```rust,ignore
//! use fb_codec::Connection;
//!
//! let mut conn = Connection::new(tcp_stream);
//! let abort = conn.abort_handle();
//!
//! tokio::spawn(async move {
//!     abort.abort().await;
//! });
//! let reply = conn.read_message().await; // Err(CodecError::Aborted)
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod event_codec;
pub mod framed;
pub mod wire_codec;

pub use connection::{AbortHandle, Connection};
pub use error::CodecError;
pub use event_codec::EventCodec;
pub use framed::{EventReader, MessageReader, RequestWriter};
pub use wire_codec::{DEFAULT_MAX_MESSAGE_SIZE, WireCodec};
