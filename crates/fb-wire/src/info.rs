//! Information request items and response parsing.
//!
//! Info responses are a list of `[item][len u16 LE][value]` clumplets
//! terminated by `isc_info_end`.

use crate::error::ProtocolError;

/// End of the info response.
pub const ISC_INFO_END: u8 = 1;
/// The response buffer was too small.
pub const ISC_INFO_TRUNCATED: u8 = 2;
/// The server could not answer the item.
pub const ISC_INFO_ERROR: u8 = 3;

/// Database info items.
pub mod database {
    /// Database file and site names.
    pub const DB_ID: u8 = 4;
    /// Page size in bytes.
    pub const PAGE_SIZE: u8 = 14;
    /// On-disk structure major version.
    pub const ODS_VERSION: u8 = 32;
    /// On-disk structure minor version.
    pub const ODS_MINOR_VERSION: u8 = 33;
    /// SQL dialect of the database.
    pub const DB_SQL_DIALECT: u8 = 62;
    /// Server version strings.
    pub const FIREBIRD_VERSION: u8 = 103;
}

/// Transaction info items.
pub mod transaction {
    /// Transaction id.
    pub const ID: u8 = 4;
}

/// Blob info items.
pub mod blob {
    /// Number of segments.
    pub const NUM_SEGMENTS: u8 = 4;
    /// Largest segment.
    pub const MAX_SEGMENT: u8 = 5;
    /// Total length in bytes.
    pub const TOTAL_LENGTH: u8 = 6;
    /// Storage type (0 segmented, 1 stream).
    pub const TYPE: u8 = 7;
}

/// Service info items.
pub mod service {
    /// Service manager version.
    pub const SERVER_VERSION: u8 = 55;
    /// Implementation string.
    pub const IMPLEMENTATION: u8 = 56;
    /// Request timeout.
    pub const TIMEOUT: u8 = 64;
}

/// One clumplet of an info response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoItem<'a> {
    /// Item code.
    pub item: u8,
    /// Raw value.
    pub value: &'a [u8],
}

impl InfoItem<'_> {
    /// Interpret the value as a little-endian integer of 1 to 8 bytes.
    pub fn as_integer(&self) -> Result<i64, ProtocolError> {
        decode_vax_integer(self.value)
    }
}

/// Parse an info response into its clumplets.
///
/// A truncated response fails, since the missing items cannot be told
/// apart from absent ones.
pub fn parse_info(mut data: &[u8]) -> Result<Vec<InfoItem<'_>>, ProtocolError> {
    let mut items = Vec::new();
    while let Some((&item, rest)) = data.split_first() {
        match item {
            ISC_INFO_END => break,
            ISC_INFO_TRUNCATED => return Err(ProtocolError::InvalidBuffer("info response truncated")),
            _ => {}
        }
        if rest.len() < 2 {
            return Err(ProtocolError::InvalidBuffer("missing info item length"));
        }
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        let rest = &rest[2..];
        if rest.len() < len {
            return Err(ProtocolError::InvalidBuffer("info item exceeds buffer"));
        }
        items.push(InfoItem {
            item,
            value: &rest[..len],
        });
        data = &rest[len..];
    }
    Ok(items)
}

/// Find one item and decode it as an integer.
pub fn find_integer(data: &[u8], item: u8) -> Result<Option<i64>, ProtocolError> {
    for entry in parse_info(data)? {
        if entry.item == item {
            return entry.as_integer().map(Some);
        }
    }
    Ok(None)
}

/// Decode a little-endian integer of variable width.
pub fn decode_vax_integer(bytes: &[u8]) -> Result<i64, ProtocolError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(ProtocolError::InvalidBuffer("invalid integer width"));
    }
    let mut value: i64 = 0;
    for (shift, &b) in bytes.iter().enumerate() {
        value |= i64::from(b) << (8 * shift);
    }
    // Sign-extend narrower values.
    let bits = bytes.len() * 8;
    if bits < 64 && (value >> (bits - 1)) & 1 == 1 {
        value |= -1i64 << bits;
    }
    Ok(value)
}

/// Encode `[item][len][value LE]` for an integer item; used to build
/// responses.
pub fn encode_integer_item(dst: &mut Vec<u8>, item: u8, value: i32) {
    dst.push(item);
    dst.extend_from_slice(&4u16.to_le_bytes());
    dst.extend_from_slice(&value.to_le_bytes());
}
