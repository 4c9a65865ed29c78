//! Blob identifiers, seek modes and segment framing.

use bytes::{BufMut, Bytes, BytesMut};
use core::fmt;

use crate::error::ProtocolError;
use crate::params::{ParameterBuffer, bpb};

/// Largest segment that can be written in one `op_put_segment`.
pub const MAX_SEGMENT_SIZE: usize = 32_765;

/// Response object handle of `op_get_segment` when more data follows
/// within the current segment.
pub const SEGMENT_INCOMPLETE: i32 = 1;

/// Response object handle of `op_get_segment` at end of blob.
pub const SEGMENT_EOF: i32 = 2;

/// Server-assigned 64-bit blob identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlobId(pub i64);

impl BlobId {
    /// The null blob id.
    pub const NULL: Self = Self(0);

    /// Whether the id is null.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Origin of a blob seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SeekMode {
    /// From the start of the blob.
    Absolute = 0,
    /// From the current position.
    Relative = 1,
    /// From the end of the blob.
    FromEnd = 2,
}

impl SeekMode {
    /// Wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a wire value.
    pub fn from_i32(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::Absolute),
            1 => Ok(Self::Relative),
            2 => Ok(Self::FromEnd),
            _ => Err(ProtocolError::InvalidBuffer("unknown seek mode")),
        }
    }
}

/// Storage organization of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobType {
    /// Application-defined segments; no random access.
    #[default]
    Segmented,
    /// Byte-addressable, seekable.
    Stream,
}

/// Builder for blob parameter buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobParameterBuffer {
    blob_type: Option<BlobType>,
}

impl BlobParameterBuffer {
    /// Empty parameter buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a storage type.
    #[must_use]
    pub fn with_type(mut self, blob_type: BlobType) -> Self {
        self.blob_type = Some(blob_type);
        self
    }

    /// Requested storage type.
    #[must_use]
    pub fn blob_type(&self) -> Option<BlobType> {
        self.blob_type
    }

    /// Encode to BPB bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = ParameterBuffer::blob();
        if let Some(blob_type) = self.blob_type {
            let value = match blob_type {
                BlobType::Segmented => bpb::TYPE_SEGMENTED,
                BlobType::Stream => bpb::TYPE_STREAM,
            };
            buf.add_byte(bpb::TYPE, value);
        }
        buf.freeze()
    }

    /// Decode BPB bytes; unknown items are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let Some((&version, body)) = bytes.split_first() else {
            return Ok(Self::default());
        };
        if version != bpb::VERSION1 {
            return Err(ProtocolError::InvalidBuffer("unknown BPB version"));
        }
        let mut result = Self::default();
        for (tag, value) in crate::params::parse_items(body)? {
            if tag == bpb::TYPE {
                result.blob_type = match value.first() {
                    Some(&bpb::TYPE_STREAM) => Some(BlobType::Stream),
                    _ => Some(BlobType::Segmented),
                };
            }
        }
        Ok(result)
    }
}

/// Split the data of an `op_get_segment` response into its segments and
/// concatenate them.
///
/// The data is a sequence of `[len u16 LE][bytes]`.
pub fn decode_segments(data: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut out = BytesMut::with_capacity(data.len());
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(ProtocolError::InvalidBuffer("truncated segment length"));
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        if rest.len() < len {
            return Err(ProtocolError::InvalidBuffer("segment exceeds response"));
        }
        out.put_slice(&rest[..len]);
        rest = &rest[len..];
    }
    Ok(out.freeze())
}

/// Append one `[len u16 LE][bytes]` segment.
pub fn encode_segment(dst: &mut impl BufMut, segment: &[u8]) {
    dst.put_u16_le(segment.len() as u16);
    dst.put_slice(segment);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_segments() {
        let mut buf = BytesMut::new();
        encode_segment(&mut buf, b"hello ");
        encode_segment(&mut buf, b"");
        encode_segment(&mut buf, b"world");
        assert_eq!(&decode_segments(&buf).unwrap()[..], b"hello world");
    }

    #[test]
    fn test_decode_truncated_segment() {
        assert!(decode_segments(&[5, 0, b'a']).is_err());
        assert!(decode_segments(&[5]).is_err());
    }

    #[test]
    fn test_bpb() {
        let bpb = BlobParameterBuffer::new().with_type(BlobType::Stream);
        let bytes = bpb.to_bytes();
        assert_eq!(&bytes[..], &[1, 3, 1, 1]);
        assert_eq!(BlobParameterBuffer::parse(&bytes).unwrap(), bpb);
        assert_eq!(BlobParameterBuffer::parse(&[]).unwrap().blob_type(), None);
    }

    #[test]
    fn test_blob_id_display() {
        assert_eq!(BlobId(0x81).to_string(), "0x0000000000000081");
        assert!(BlobId::NULL.is_null());
    }
}
