//! Client-to-server requests.
//!
//! [`Request`] covers every operation this client sends. Decoding is
//! provided as well so that test servers can speak the protocol.

use bytes::{Buf, BufMut, Bytes};

use crate::blob::{BlobId, SeekMode};
use crate::error::ProtocolError;
use crate::opcode::{Operation, P_REQ_ASYNC};
use crate::version::{CONNECT_VERSION3, ProtocolDescriptor, ProtocolVersion};
use crate::xdr;

/// User identification tags in the `op_connect` user id buffer.
pub mod cnct {
    /// Operating system user.
    pub const USER: u8 = 1;
    /// Client host name.
    pub const HOST: u8 = 4;
    /// User verification requested.
    pub const USER_VERIFICATION: u8 = 6;
}

/// A protocol offered in `op_connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferedProtocol {
    /// Version number.
    pub version: ProtocolVersion,
    /// Architecture type.
    pub architecture: i32,
    /// Minimum protocol type.
    pub min_type: i32,
    /// Maximum protocol type.
    pub max_type: i32,
    /// Preference weight.
    pub weight: i32,
}

impl From<&ProtocolDescriptor> for OfferedProtocol {
    fn from(d: &ProtocolDescriptor) -> Self {
        Self {
            version: d.version,
            architecture: d.architecture,
            min_type: d.min_type,
            max_type: d.max_type,
            weight: d.weight,
        }
    }
}

/// Target of an information request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoTarget {
    /// Database attachment.
    Database,
    /// Transaction.
    Transaction,
    /// Blob.
    Blob,
}

impl InfoTarget {
    const fn operation(self) -> Operation {
        match self {
            Self::Database => Operation::InfoDatabase,
            Self::Transaction => Operation::InfoTransaction,
            Self::Blob => Operation::InfoBlob,
        }
    }
}

/// Build the user identification buffer sent with `op_connect`.
#[must_use]
pub fn user_identification(user: &str, host: &str) -> Bytes {
    let mut buf = Vec::with_capacity(user.len() + host.len() + 6);
    for (tag, value) in [(cnct::USER, user), (cnct::HOST, host)] {
        let value = &value.as_bytes()[..value.len().min(255)];
        buf.push(tag);
        buf.push(value.len() as u8);
        buf.extend_from_slice(value);
    }
    buf.push(cnct::USER_VERIFICATION);
    buf.push(0);
    Bytes::from(buf)
}

/// A request message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Request {
    /// Negotiate the protocol.
    Connect {
        /// Database path the connection is for.
        database: String,
        /// User identification buffer.
        user_id: Bytes,
        /// Protocols offered, any order.
        protocols: Vec<OfferedProtocol>,
    },
    /// Attach to an existing database.
    Attach {
        /// Database path or alias.
        database: String,
        /// Database parameter buffer.
        dpb: Bytes,
    },
    /// Create a database and attach to it.
    Create {
        /// Database path.
        database: String,
        /// Database parameter buffer.
        dpb: Bytes,
    },
    /// Detach from the database.
    Detach {
        /// Database handle.
        db_handle: i32,
    },
    /// Close the connection.
    Disconnect,
    /// Drop the attached database.
    DropDatabase {
        /// Database handle.
        db_handle: i32,
    },
    /// Start a transaction.
    StartTransaction {
        /// Database handle.
        db_handle: i32,
        /// Transaction parameter buffer.
        tpb: Bytes,
    },
    /// Commit, roll back or prepare a transaction.
    TransactionControl {
        /// One of commit, rollback, their retaining variants or prepare.
        operation: Operation,
        /// Transaction handle.
        tx_handle: i32,
    },
    /// Prepare with a message for the limbo record.
    Prepare2 {
        /// Transaction handle.
        tx_handle: i32,
        /// Recovery message.
        message: Bytes,
    },
    /// Reconnect to a limbo transaction.
    Reconnect {
        /// Database handle.
        db_handle: i32,
        /// Transaction id as little-endian bytes.
        transaction_id: Bytes,
    },
    /// Create a blob for writing.
    CreateBlob {
        /// Transaction handle.
        tx_handle: i32,
        /// Optional blob parameter buffer; selects `op_create_blob2`.
        bpb: Option<Bytes>,
    },
    /// Open a blob for reading.
    OpenBlob {
        /// Transaction handle.
        tx_handle: i32,
        /// Blob to open.
        blob_id: BlobId,
        /// Optional blob parameter buffer; selects `op_open_blob2`.
        bpb: Option<Bytes>,
    },
    /// Read segments.
    GetSegment {
        /// Blob handle.
        blob_handle: i32,
        /// Receive buffer size, segment length prefixes included.
        length: i32,
    },
    /// Write one segment.
    PutSegment {
        /// Blob handle.
        blob_handle: i32,
        /// Segment data.
        segment: Bytes,
    },
    /// Seek in a stream blob.
    SeekBlob {
        /// Blob handle.
        blob_handle: i32,
        /// Seek origin.
        mode: SeekMode,
        /// Offset relative to the origin.
        offset: i32,
    },
    /// Close a blob.
    CloseBlob {
        /// Blob handle.
        blob_handle: i32,
    },
    /// Cancel a blob being written.
    CancelBlob {
        /// Blob handle.
        blob_handle: i32,
    },
    /// Information request.
    Info {
        /// Object kind.
        target: InfoTarget,
        /// Object handle.
        handle: i32,
        /// Requested items.
        items: Bytes,
        /// Largest response the client accepts.
        max_length: i32,
    },
    /// Request the auxiliary event connection.
    ConnectRequest {
        /// Database handle.
        db_handle: i32,
    },
    /// Queue interest in events.
    QueEvents {
        /// Auxiliary connection handle.
        aux_handle: i32,
        /// Event parameter buffer.
        events: Bytes,
        /// Client-local id of the request.
        local_id: i32,
    },
    /// Cancel queued events.
    CancelEvents {
        /// Database handle.
        db_handle: i32,
        /// Client-local id used when queueing.
        local_id: i32,
    },
    /// Execute a statement without preparing it.
    ExecImmediate {
        /// Transaction handle, 0 for none.
        tx_handle: i32,
        /// Database handle.
        db_handle: i32,
        /// SQL dialect.
        dialect: i32,
        /// Statement text.
        statement: String,
    },
    /// Attach to the service manager.
    ServiceAttach {
        /// Service name.
        service: String,
        /// Service parameter buffer.
        spb: Bytes,
    },
    /// Detach from the service manager.
    ServiceDetach {
        /// Service handle.
        handle: i32,
    },
    /// Service information request.
    ServiceInfo {
        /// Service handle.
        handle: i32,
        /// Service parameter buffer.
        spb: Bytes,
        /// Requested items.
        items: Bytes,
        /// Largest response the client accepts.
        max_length: i32,
    },
    /// Start a service action.
    ServiceStart {
        /// Service handle.
        handle: i32,
        /// Action parameter buffer.
        spb: Bytes,
    },
    /// Cancel the running operation.
    Cancel {
        /// Cancel kind.
        kind: i32,
    },
}

impl Request {
    /// The operation code sent for this request.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Connect { .. } => Operation::Connect,
            Self::Attach { .. } => Operation::Attach,
            Self::Create { .. } => Operation::Create,
            Self::Detach { .. } => Operation::Detach,
            Self::Disconnect => Operation::Disconnect,
            Self::DropDatabase { .. } => Operation::DropDatabase,
            Self::StartTransaction { .. } => Operation::Transaction,
            Self::TransactionControl { operation, .. } => *operation,
            Self::Prepare2 { .. } => Operation::Prepare2,
            Self::Reconnect { .. } => Operation::Reconnect,
            Self::CreateBlob { bpb: None, .. } => Operation::CreateBlob,
            Self::CreateBlob { bpb: Some(_), .. } => Operation::CreateBlob2,
            Self::OpenBlob { bpb: None, .. } => Operation::OpenBlob,
            Self::OpenBlob { bpb: Some(_), .. } => Operation::OpenBlob2,
            Self::GetSegment { .. } => Operation::GetSegment,
            Self::PutSegment { .. } => Operation::PutSegment,
            Self::SeekBlob { .. } => Operation::SeekBlob,
            Self::CloseBlob { .. } => Operation::CloseBlob,
            Self::CancelBlob { .. } => Operation::CancelBlob,
            Self::Info { target, .. } => target.operation(),
            Self::ConnectRequest { .. } => Operation::ConnectRequest,
            Self::QueEvents { .. } => Operation::QueEvents,
            Self::CancelEvents { .. } => Operation::CancelEvents,
            Self::ExecImmediate { .. } => Operation::ExecImmediate,
            Self::ServiceAttach { .. } => Operation::ServiceAttach,
            Self::ServiceDetach { .. } => Operation::ServiceDetach,
            Self::ServiceInfo { .. } => Operation::ServiceInfo,
            Self::ServiceStart { .. } => Operation::ServiceStart,
            Self::Cancel { .. } => Operation::Cancel,
        }
    }

    /// Encode the request including its operation code.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32(self.operation().code());
        match self {
            Self::Connect {
                database,
                user_id,
                protocols,
            } => {
                dst.put_i32(Operation::Attach.code());
                dst.put_i32(CONNECT_VERSION3);
                dst.put_i32(crate::version::ARCH_GENERIC);
                xdr::write_string(dst, database);
                dst.put_i32(protocols.len() as i32);
                xdr::write_buffer(dst, user_id);
                for p in protocols {
                    dst.put_i32(p.version.raw());
                    dst.put_i32(p.architecture);
                    dst.put_i32(p.min_type);
                    dst.put_i32(p.max_type);
                    dst.put_i32(p.weight);
                }
            }
            Self::Attach { database, dpb } | Self::Create { database, dpb } => {
                dst.put_i32(0);
                xdr::write_string(dst, database);
                xdr::write_buffer(dst, dpb);
            }
            Self::Detach { db_handle } | Self::DropDatabase { db_handle } => dst.put_i32(*db_handle),
            Self::Disconnect => {}
            Self::StartTransaction { db_handle, tpb } => {
                dst.put_i32(*db_handle);
                xdr::write_buffer(dst, tpb);
            }
            Self::TransactionControl { tx_handle, .. } => dst.put_i32(*tx_handle),
            Self::Prepare2 { tx_handle, message } => {
                dst.put_i32(*tx_handle);
                xdr::write_buffer(dst, message);
            }
            Self::Reconnect {
                db_handle,
                transaction_id,
            } => {
                dst.put_i32(*db_handle);
                xdr::write_buffer(dst, transaction_id);
            }
            Self::CreateBlob { tx_handle, bpb } => {
                if let Some(bpb) = bpb {
                    xdr::write_buffer(dst, bpb);
                }
                dst.put_i32(*tx_handle);
                dst.put_i64(BlobId::NULL.0);
            }
            Self::OpenBlob {
                tx_handle,
                blob_id,
                bpb,
            } => {
                if let Some(bpb) = bpb {
                    xdr::write_buffer(dst, bpb);
                }
                dst.put_i32(*tx_handle);
                dst.put_i64(blob_id.0);
            }
            Self::GetSegment { blob_handle, length } => {
                dst.put_i32(*blob_handle);
                dst.put_i32(*length);
                // empty send buffer
                dst.put_i32(0);
            }
            Self::PutSegment { blob_handle, segment } => {
                dst.put_i32(*blob_handle);
                dst.put_i32(segment.len() as i32);
                xdr::write_buffer(dst, segment);
            }
            Self::SeekBlob {
                blob_handle,
                mode,
                offset,
            } => {
                dst.put_i32(*blob_handle);
                dst.put_i32(mode.code());
                dst.put_i32(*offset);
            }
            Self::CloseBlob { blob_handle } | Self::CancelBlob { blob_handle } => dst.put_i32(*blob_handle),
            Self::Info {
                handle,
                items,
                max_length,
                ..
            } => {
                dst.put_i32(*handle);
                dst.put_i32(0);
                xdr::write_buffer(dst, items);
                dst.put_i32(*max_length);
            }
            Self::ConnectRequest { db_handle } => {
                dst.put_i32(P_REQ_ASYNC);
                dst.put_i32(*db_handle);
                dst.put_i32(0);
            }
            Self::QueEvents {
                aux_handle,
                events,
                local_id,
            } => {
                dst.put_i32(*aux_handle);
                xdr::write_buffer(dst, events);
                dst.put_i64(0);
                dst.put_i32(*local_id);
            }
            Self::CancelEvents { db_handle, local_id } => {
                dst.put_i32(*db_handle);
                dst.put_i32(*local_id);
            }
            Self::ExecImmediate {
                tx_handle,
                db_handle,
                dialect,
                statement,
            } => {
                dst.put_i32(*tx_handle);
                dst.put_i32(*db_handle);
                dst.put_i32(*dialect);
                xdr::write_string(dst, statement);
                xdr::write_buffer(dst, &[]);
                dst.put_i32(0);
            }
            Self::ServiceAttach { service, spb } => {
                dst.put_i32(0);
                xdr::write_string(dst, service);
                xdr::write_buffer(dst, spb);
            }
            Self::ServiceDetach { handle } => dst.put_i32(*handle),
            Self::ServiceInfo {
                handle,
                spb,
                items,
                max_length,
            } => {
                dst.put_i32(*handle);
                dst.put_i32(0);
                xdr::write_buffer(dst, spb);
                xdr::write_buffer(dst, items);
                dst.put_i32(*max_length);
            }
            Self::ServiceStart { handle, spb } => {
                dst.put_i32(*handle);
                dst.put_i32(0);
                xdr::write_buffer(dst, spb);
            }
            Self::Cancel { kind } => dst.put_i32(*kind),
        }
    }

    /// Decode one request.
    ///
    /// Returns [`ProtocolError::Incomplete`] when the buffer ends early.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let operation = Operation::from_i32(xdr::read_i32(src)?)?;
        let request = match operation {
            Operation::Connect => {
                let _attach_op = xdr::read_i32(src)?;
                let _connect_version = xdr::read_i32(src)?;
                let _client_arch = xdr::read_i32(src)?;
                let database = xdr::read_string(src)?;
                let count = xdr::read_i32(src)?;
                let user_id = xdr::read_buffer(src)?;
                let count = usize::try_from(count).map_err(|_| ProtocolError::InvalidLength(count))?;
                let mut protocols = Vec::with_capacity(count.min(16));
                for _ in 0..count {
                    protocols.push(OfferedProtocol {
                        version: ProtocolVersion::new(xdr::read_i32(src)?),
                        architecture: xdr::read_i32(src)?,
                        min_type: xdr::read_i32(src)?,
                        max_type: xdr::read_i32(src)?,
                        weight: xdr::read_i32(src)?,
                    });
                }
                Self::Connect {
                    database,
                    user_id,
                    protocols,
                }
            }
            Operation::Attach | Operation::Create => {
                let _ = xdr::read_i32(src)?;
                let database = xdr::read_string(src)?;
                let dpb = xdr::read_buffer(src)?;
                if operation == Operation::Attach {
                    Self::Attach { database, dpb }
                } else {
                    Self::Create { database, dpb }
                }
            }
            Operation::Detach => Self::Detach {
                db_handle: xdr::read_i32(src)?,
            },
            Operation::Disconnect => Self::Disconnect,
            Operation::DropDatabase => Self::DropDatabase {
                db_handle: xdr::read_i32(src)?,
            },
            Operation::Transaction => Self::StartTransaction {
                db_handle: xdr::read_i32(src)?,
                tpb: xdr::read_buffer(src)?,
            },
            Operation::Commit
            | Operation::Rollback
            | Operation::CommitRetaining
            | Operation::RollbackRetaining
            | Operation::Prepare => Self::TransactionControl {
                operation,
                tx_handle: xdr::read_i32(src)?,
            },
            Operation::Prepare2 => Self::Prepare2 {
                tx_handle: xdr::read_i32(src)?,
                message: xdr::read_buffer(src)?,
            },
            Operation::Reconnect => Self::Reconnect {
                db_handle: xdr::read_i32(src)?,
                transaction_id: xdr::read_buffer(src)?,
            },
            Operation::CreateBlob | Operation::CreateBlob2 => {
                let bpb = if operation == Operation::CreateBlob2 {
                    Some(xdr::read_buffer(src)?)
                } else {
                    None
                };
                let tx_handle = xdr::read_i32(src)?;
                let _ = xdr::read_i64(src)?;
                Self::CreateBlob { tx_handle, bpb }
            }
            Operation::OpenBlob | Operation::OpenBlob2 => {
                let bpb = if operation == Operation::OpenBlob2 {
                    Some(xdr::read_buffer(src)?)
                } else {
                    None
                };
                Self::OpenBlob {
                    tx_handle: xdr::read_i32(src)?,
                    blob_id: BlobId(xdr::read_i64(src)?),
                    bpb,
                }
            }
            Operation::GetSegment => {
                let blob_handle = xdr::read_i32(src)?;
                let length = xdr::read_i32(src)?;
                xdr::skip_buffer(src)?;
                Self::GetSegment { blob_handle, length }
            }
            Operation::PutSegment => {
                let blob_handle = xdr::read_i32(src)?;
                let _ = xdr::read_i32(src)?;
                Self::PutSegment {
                    blob_handle,
                    segment: xdr::read_buffer(src)?,
                }
            }
            Operation::SeekBlob => Self::SeekBlob {
                blob_handle: xdr::read_i32(src)?,
                mode: SeekMode::from_i32(xdr::read_i32(src)?)?,
                offset: xdr::read_i32(src)?,
            },
            Operation::CloseBlob => Self::CloseBlob {
                blob_handle: xdr::read_i32(src)?,
            },
            Operation::CancelBlob => Self::CancelBlob {
                blob_handle: xdr::read_i32(src)?,
            },
            Operation::InfoDatabase | Operation::InfoTransaction | Operation::InfoBlob => {
                let target = match operation {
                    Operation::InfoDatabase => InfoTarget::Database,
                    Operation::InfoTransaction => InfoTarget::Transaction,
                    _ => InfoTarget::Blob,
                };
                let handle = xdr::read_i32(src)?;
                let _incarnation = xdr::read_i32(src)?;
                Self::Info {
                    target,
                    handle,
                    items: xdr::read_buffer(src)?,
                    max_length: xdr::read_i32(src)?,
                }
            }
            Operation::ConnectRequest => {
                let _req_type = xdr::read_i32(src)?;
                let db_handle = xdr::read_i32(src)?;
                let _partner = xdr::read_i32(src)?;
                Self::ConnectRequest { db_handle }
            }
            Operation::QueEvents => {
                let aux_handle = xdr::read_i32(src)?;
                let events = xdr::read_buffer(src)?;
                let _ast = xdr::read_i64(src)?;
                Self::QueEvents {
                    aux_handle,
                    events,
                    local_id: xdr::read_i32(src)?,
                }
            }
            Operation::CancelEvents => Self::CancelEvents {
                db_handle: xdr::read_i32(src)?,
                local_id: xdr::read_i32(src)?,
            },
            Operation::ExecImmediate => {
                let tx_handle = xdr::read_i32(src)?;
                let db_handle = xdr::read_i32(src)?;
                let dialect = xdr::read_i32(src)?;
                let statement = xdr::read_string(src)?;
                xdr::skip_buffer(src)?;
                let _message_number = xdr::read_i32(src)?;
                Self::ExecImmediate {
                    tx_handle,
                    db_handle,
                    dialect,
                    statement,
                }
            }
            Operation::ServiceAttach => {
                let _ = xdr::read_i32(src)?;
                Self::ServiceAttach {
                    service: xdr::read_string(src)?,
                    spb: xdr::read_buffer(src)?,
                }
            }
            Operation::ServiceDetach => Self::ServiceDetach {
                handle: xdr::read_i32(src)?,
            },
            Operation::ServiceInfo => {
                let handle = xdr::read_i32(src)?;
                let _incarnation = xdr::read_i32(src)?;
                Self::ServiceInfo {
                    handle,
                    spb: xdr::read_buffer(src)?,
                    items: xdr::read_buffer(src)?,
                    max_length: xdr::read_i32(src)?,
                }
            }
            Operation::ServiceStart => {
                let handle = xdr::read_i32(src)?;
                let _incarnation = xdr::read_i32(src)?;
                Self::ServiceStart {
                    handle,
                    spb: xdr::read_buffer(src)?,
                }
            }
            Operation::Cancel => Self::Cancel {
                kind: xdr::read_i32(src)?,
            },
            other => return Err(ProtocolError::UnexpectedOperation(other.code())),
        };
        Ok(request)
    }
}

/// Encode a transaction id for `op_reconnect`.
///
/// Ids that fit in 32 bits use four little-endian bytes, larger ids eight.
#[must_use]
pub fn encode_transaction_id(id: i64) -> Bytes {
    match i32::try_from(id) {
        Ok(small) => Bytes::copy_from_slice(&small.to_le_bytes()),
        Err(_) => Bytes::copy_from_slice(&id.to_le_bytes()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::version::SUPPORTED_PROTOCOLS;
    use bytes::BytesMut;

    fn encode(request: &Request) -> BytesMut {
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        buf
    }

    #[test]
    fn test_attach_layout() {
        let buf = encode(&Request::Attach {
            database: "db".into(),
            dpb: Bytes::from_static(&[1]),
        });
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 19, 0, 0, 0, 0, 0, 0, 0, 2, b'd', b'b', 0, 0, 0, 0, 0, 1, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_open_blob_selects_operation() {
        let plain = Request::OpenBlob {
            tx_handle: 1,
            blob_id: BlobId(5),
            bpb: None,
        };
        let with_bpb = Request::OpenBlob {
            tx_handle: 1,
            blob_id: BlobId(5),
            bpb: Some(Bytes::from_static(&[1, 3, 1, 1])),
        };
        assert_eq!(plain.operation(), Operation::OpenBlob);
        assert_eq!(with_bpb.operation(), Operation::OpenBlob2);
        assert_eq!(encode(&plain).len(), 16);
    }

    #[test]
    fn test_connect_decodes() {
        let request = Request::Connect {
            database: "/data/test.fdb".into(),
            user_id: user_identification("alice", "host1"),
            protocols: SUPPORTED_PROTOCOLS.iter().map(OfferedProtocol::from).collect(),
        };
        let decoded = Request::decode(&mut encode(&request).freeze()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_every_blob_request() {
        let requests = [
            Request::CreateBlob {
                tx_handle: 3,
                bpb: Some(Bytes::from_static(&[1])),
            },
            Request::GetSegment {
                blob_handle: 2,
                length: 32767,
            },
            Request::PutSegment {
                blob_handle: 2,
                segment: Bytes::from_static(b"abc"),
            },
            Request::SeekBlob {
                blob_handle: 2,
                mode: SeekMode::FromEnd,
                offset: -4,
            },
            Request::QueEvents {
                aux_handle: 9,
                events: Bytes::from_static(&[1, 1, b'A', 0, 0, 0, 0]),
                local_id: 4,
            },
        ];
        for request in requests {
            let decoded = Request::decode(&mut encode(&request).freeze()).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_partial_request_incomplete() {
        let buf = encode(&Request::ExecImmediate {
            tx_handle: 1,
            db_handle: 2,
            dialect: 3,
            statement: "select 1 from rdb$database".into(),
        });
        let mut short = &buf[..buf.len() - 1];
        assert!(Request::decode(&mut short).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_transaction_id_encoding() {
        assert_eq!(&encode_transaction_id(0x0102)[..], &[2, 1, 0, 0]);
        assert_eq!(encode_transaction_id(1 << 40).len(), 8);
    }

    #[test]
    fn test_user_identification() {
        let id = user_identification("u", "h");
        assert_eq!(&id[..], &[1, 1, b'u', 4, 1, b'h', 6, 0]);
    }
}
