//! Parameter buffers (DPB, TPB, BPB, SPB).
//!
//! Each buffer starts with a version byte followed by tagged items. Most
//! items are `[tag][len][value]`; transaction flags are a bare tag.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Database parameter buffer tags.
pub mod dpb {
    /// DPB version 1.
    pub const VERSION1: u8 = 1;
    /// Page size for database creation.
    pub const PAGE_SIZE: u8 = 4;
    /// User name.
    pub const USER_NAME: u8 = 28;
    /// Password.
    pub const PASSWORD: u8 = 29;
    /// Connection character set.
    pub const LC_CTYPE: u8 = 48;
    /// Connect timeout in seconds.
    pub const CONNECT_TIMEOUT: u8 = 57;
    /// SQL dialect.
    pub const SQL_DIALECT: u8 = 63;
}

/// Transaction parameter buffer tags.
pub mod tpb {
    /// TPB version 3.
    pub const VERSION3: u8 = 3;
    /// Table stability isolation.
    pub const CONSISTENCY: u8 = 1;
    /// Snapshot isolation.
    pub const CONCURRENCY: u8 = 2;
    /// Wait on lock conflicts.
    pub const WAIT: u8 = 6;
    /// Fail immediately on lock conflicts.
    pub const NOWAIT: u8 = 7;
    /// Read-only access.
    pub const READ: u8 = 8;
    /// Read-write access.
    pub const WRITE: u8 = 9;
    /// Read committed isolation.
    pub const READ_COMMITTED: u8 = 15;
    /// Read the latest committed version.
    pub const REC_VERSION: u8 = 17;
    /// Wait for uncommitted versions.
    pub const NO_REC_VERSION: u8 = 18;
    /// Lock timeout in seconds.
    pub const LOCK_TIMEOUT: u8 = 21;
}

/// Blob parameter buffer tags.
pub mod bpb {
    /// BPB version 1.
    pub const VERSION1: u8 = 1;
    /// Blob storage type.
    pub const TYPE: u8 = 3;
    /// Segmented storage.
    pub const TYPE_SEGMENTED: u8 = 0;
    /// Stream storage.
    pub const TYPE_STREAM: u8 = 1;
}

/// Service parameter buffer tags.
pub mod spb {
    /// SPB version 2.
    pub const VERSION: u8 = 2;
    /// Current SPB version value.
    pub const CURRENT_VERSION: u8 = 2;
    /// User name.
    pub const USER_NAME: u8 = 28;
    /// Password.
    pub const PASSWORD: u8 = 29;
}

/// A tagged parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBuffer {
    buf: BytesMut,
}

impl ParameterBuffer {
    /// Buffer starting with the given header bytes.
    #[must_use]
    pub fn with_header(header: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(header);
        Self { buf }
    }

    /// Empty database parameter buffer.
    #[must_use]
    pub fn database() -> Self {
        Self::with_header(&[dpb::VERSION1])
    }

    /// Empty transaction parameter buffer.
    #[must_use]
    pub fn transaction() -> Self {
        Self::with_header(&[tpb::VERSION3])
    }

    /// Empty blob parameter buffer.
    #[must_use]
    pub fn blob() -> Self {
        Self::with_header(&[bpb::VERSION1])
    }

    /// Empty service attach parameter buffer.
    #[must_use]
    pub fn service_attach() -> Self {
        Self::with_header(&[spb::VERSION, spb::CURRENT_VERSION])
    }

    /// Empty buffer without header, used for service requests.
    #[must_use]
    pub fn raw() -> Self {
        Self::with_header(&[])
    }

    /// Append a bare tag.
    pub fn add_flag(&mut self, tag: u8) -> &mut Self {
        self.buf.put_u8(tag);
        self
    }

    /// Append `[tag][1][value]`.
    pub fn add_byte(&mut self, tag: u8, value: u8) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u8(1);
        self.buf.put_u8(value);
        self
    }

    /// Append `[tag][4][value LE]`.
    pub fn add_int(&mut self, tag: u8, value: i32) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u8(4);
        self.buf.put_i32_le(value);
        self
    }

    /// Append `[tag][len][bytes]`; at most 255 bytes.
    pub fn add_bytes(&mut self, tag: u8, value: &[u8]) -> Result<&mut Self, ProtocolError> {
        let len = u8::try_from(value.len()).map_err(|_| ProtocolError::ValueTooLong {
            length: value.len(),
            max: u8::MAX as usize,
        })?;
        self.buf.put_u8(tag);
        self.buf.put_u8(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Append `[tag][len][utf-8 bytes]`.
    pub fn add_string(&mut self, tag: u8, value: &str) -> Result<&mut Self, ProtocolError> {
        self.add_bytes(tag, value.as_bytes())
    }

    /// Encoded contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written, header included.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish into immutable bytes.
    #[must_use]
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Iterate over `[tag][len][value]` items of a parameter buffer body.
///
/// `body` must not include the version header.
pub fn parse_items(mut body: &[u8]) -> Result<Vec<(u8, &[u8])>, ProtocolError> {
    let mut items = Vec::new();
    while let Some((&tag, rest)) = body.split_first() {
        let (&len, rest) = rest
            .split_first()
            .ok_or(ProtocolError::InvalidBuffer("missing item length"))?;
        let len = len as usize;
        if rest.len() < len {
            return Err(ProtocolError::InvalidBuffer("item exceeds buffer"));
        }
        items.push((tag, &rest[..len]));
        body = &rest[len..];
    }
    Ok(items)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dpb_layout() {
        let mut buf = ParameterBuffer::database();
        buf.add_string(dpb::USER_NAME, "SYSDBA").unwrap();
        buf.add_int(dpb::SQL_DIALECT, 3);
        assert_eq!(
            buf.as_bytes(),
            &[1, 28, 6, b'S', b'Y', b'S', b'D', b'B', b'A', 63, 4, 3, 0, 0, 0]
        );
    }

    #[test]
    fn test_value_too_long() {
        let mut buf = ParameterBuffer::database();
        let long = "x".repeat(300);
        assert!(matches!(
            buf.add_string(dpb::PASSWORD, &long),
            Err(ProtocolError::ValueTooLong { length: 300, .. })
        ));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_parse_items() {
        let mut buf = ParameterBuffer::database();
        buf.add_string(dpb::USER_NAME, "a").unwrap();
        buf.add_byte(dpb::SQL_DIALECT, 3);
        let items = parse_items(&buf.as_bytes()[1..]).unwrap();
        assert_eq!(items, vec![(dpb::USER_NAME, &b"a"[..]), (dpb::SQL_DIALECT, &[3u8][..])]);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(parse_items(&[28, 5, b'a']).is_err());
    }
}
