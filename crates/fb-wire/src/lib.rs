//! # fb-wire
//!
//! Pure implementation of the Firebird binary wire protocol.
//!
//! This crate contains the XDR primitives, operation codes, protocol version
//! descriptors, the BLR calculator, status vectors, request and response
//! messages, parameter buffers and the auxiliary event frame decoder.
//!
//! ## Features
//!
//! - `encoding` (default): Firebird character set mapping via `encoding_rs`
//!
//! ## Design Philosophy
//!
//! This crate is IO-agnostic. It contains no networking logic and makes no
//! assumptions about the async runtime. `fb-codec` adapts it to tokio.
//!
//! ## Example
//!
//! ```rust
//! use fb_wire::{BlrCalculator, RowDescriptor, sql_type};
//!
//! let row = RowDescriptor::builder()
//!     .column(sql_type::SQL_LONG | 1, 0, 0, 4)
//!     .column(sql_type::SQL_VARYING, 0, 0, 20)
//!     .build();
//! let blr = BlrCalculator::new(3).calculate_blr(&row).unwrap();
//! assert_eq!(blr.len(), 8 + 5 * 2 - 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod blob;
pub mod blr;
#[cfg(feature = "encoding")]
pub mod charset;
pub mod codes;
pub mod error;
pub mod event;
pub mod field;
pub mod info;
pub mod opcode;
pub mod params;
pub mod request;
pub mod response;
pub mod status;
pub mod version;
pub mod xdr;

pub use blob::{BlobId, BlobParameterBuffer, BlobType, MAX_SEGMENT_SIZE, SeekMode};
pub use blr::{BlrCalculator, IoLength};
pub use error::ProtocolError;
pub use event::{ChannelMessage, EventCount, EventFrame, EventFrameDecoder};
pub use field::{FieldDescriptor, RowDescriptor, RowDescriptorBuilder, sql_type};
pub use opcode::{Operation, cancel_kind};
pub use params::ParameterBuffer;
pub use request::{InfoTarget, OfferedProtocol, Request};
pub use response::{AcceptPacket, GenericResponse, ServerMessage};
pub use status::{Diagnostic, Severity, StatusArgument, StatusOutcome, StatusVector};
pub use version::{Capabilities, ProtocolDescriptor, ProtocolVersion, SUPPORTED_PROTOCOLS};
