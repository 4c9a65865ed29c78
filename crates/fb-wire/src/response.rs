//! Server-to-client messages on the main connection.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;
use crate::opcode::Operation;
use crate::status::StatusVector;
use crate::version::ProtocolVersion;
use crate::xdr;

/// The generic response envelope (`op_response`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericResponse {
    /// Handle of the object the operation created or used.
    pub object_handle: i32,
    /// Blob or transaction id, depending on the operation.
    pub blob_id: i64,
    /// Operation-specific payload.
    pub data: Bytes,
    /// Status vector with errors or warnings.
    pub status: StatusVector,
}

impl GenericResponse {
    /// Successful response with the given handle.
    #[must_use]
    pub fn ok(object_handle: i32) -> Self {
        Self {
            object_handle,
            ..Self::default()
        }
    }

    /// Decode the body following the operation code.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let object_handle = xdr::read_i32(src)?;
        let blob_id = xdr::read_i64(src)?;
        let data = xdr::read_buffer(src)?;
        let status = StatusVector::decode(src)?;
        Ok(Self {
            object_handle,
            blob_id,
            data,
            status,
        })
    }

    /// Encode the full message including the operation code.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32(Operation::Response.code());
        dst.put_i32(self.object_handle);
        dst.put_i64(self.blob_id);
        xdr::write_buffer(dst, &self.data);
        self.status.encode(dst);
    }
}

/// Protocol acceptance (`op_accept`, `op_cond_accept`, `op_accept_data`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptPacket {
    /// Which accept operation the server sent.
    pub operation: Operation,
    /// Accepted protocol version, normalized.
    pub version: ProtocolVersion,
    /// Accepted architecture.
    pub architecture: i32,
    /// Accepted protocol type word (type plus flags).
    pub accept_type: i32,
    /// Authentication continuation data.
    pub auth_data: Bytes,
    /// Authentication plugin chosen by the server.
    pub plugin: String,
    /// Whether authentication already completed.
    pub authenticated: bool,
    /// Wire encryption keys offered by the server.
    pub keys: Bytes,
}

impl AcceptPacket {
    /// Plain `op_accept` for the given version.
    #[must_use]
    pub fn plain(version: ProtocolVersion, architecture: i32, accept_type: i32) -> Self {
        Self {
            operation: Operation::Accept,
            version,
            architecture,
            accept_type,
            auth_data: Bytes::new(),
            plugin: String::new(),
            authenticated: true,
            keys: Bytes::new(),
        }
    }

    fn decode(operation: Operation, src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let version = ProtocolVersion::from_accepted(xdr::read_i32(src)?);
        let architecture = xdr::read_i32(src)?;
        let accept_type = xdr::read_i32(src)?;
        let mut packet = Self::plain(version, architecture, accept_type);
        packet.operation = operation;
        if operation != Operation::Accept {
            packet.auth_data = xdr::read_buffer(src)?;
            packet.plugin = xdr::read_string(src)?;
            packet.authenticated = xdr::read_i32(src)? != 0;
            packet.keys = xdr::read_buffer(src)?;
        }
        Ok(packet)
    }

    /// Encode the full message including the operation code.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32(self.operation.code());
        dst.put_i32(self.version.raw());
        dst.put_i32(self.architecture);
        dst.put_i32(self.accept_type);
        if self.operation != Operation::Accept {
            xdr::write_buffer(dst, &self.auth_data);
            xdr::write_string(dst, &self.plugin);
            dst.put_i32(i32::from(self.authenticated));
            xdr::write_buffer(dst, &self.keys);
        }
    }
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Protocol accepted.
    Accept(AcceptPacket),
    /// Protocol rejected.
    Reject,
    /// Generic response.
    Response(GenericResponse),
    /// Server closed the conversation.
    Disconnect,
}

impl ServerMessage {
    /// Decode one message.
    ///
    /// Returns [`ProtocolError::Incomplete`] when the buffer ends before the
    /// message does; callers must retry from the same start position once
    /// more bytes are available.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let raw = xdr::read_i32(src)?;
        let operation = Operation::from_i32(raw)?;
        match operation {
            Operation::Accept | Operation::CondAccept | Operation::AcceptData => {
                Ok(Self::Accept(AcceptPacket::decode(operation, src)?))
            }
            Operation::Reject => Ok(Self::Reject),
            Operation::Response => Ok(Self::Response(GenericResponse::decode(src)?)),
            Operation::Disconnect | Operation::Exit => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnexpectedOperation(other.code())),
        }
    }
}
