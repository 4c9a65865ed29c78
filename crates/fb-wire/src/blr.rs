//! BLR (binary language representation) message descriptions.
//!
//! The server needs a BLR message description for every parameter and
//! output row it exchanges with the client. [`BlrCalculator`] derives it from
//! a [`RowDescriptor`] and also reports how many bytes each column occupies
//! in the XDR row layout.
//!
//! ```text
//! [version][begin][message][0][count_lo][count_hi]
//!   per field: [type][operands...][short][0]
//! [end][eoc]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codes::{ISC_DSQL_DATATYPE_ERR, ISC_DSQL_SQLDA_VALUE_ERR};
use crate::error::ProtocolError;
use crate::field::sql_type::*;
use crate::field::{FieldDescriptor, RowDescriptor};

/// BLR opcodes used in message descriptions.
pub mod op {
    /// Dialect 1 version tag.
    pub const BLR_VERSION4: u8 = 4;
    /// Dialect 3 version tag.
    pub const BLR_VERSION5: u8 = 5;
    /// Begin block.
    pub const BLR_BEGIN: u8 = 2;
    /// Message definition.
    pub const BLR_MESSAGE: u8 = 4;
    /// 16-bit integer.
    pub const BLR_SHORT: u8 = 7;
    /// 32-bit integer.
    pub const BLR_LONG: u8 = 8;
    /// Quad (blob and array ids).
    pub const BLR_QUAD: u8 = 9;
    /// Float.
    pub const BLR_FLOAT: u8 = 10;
    /// VAX double.
    pub const BLR_D_FLOAT: u8 = 11;
    /// Date.
    pub const BLR_SQL_DATE: u8 = 12;
    /// Time.
    pub const BLR_SQL_TIME: u8 = 13;
    /// Fixed character data.
    pub const BLR_TEXT: u8 = 14;
    /// 64-bit integer.
    pub const BLR_INT64: u8 = 16;
    /// Boolean.
    pub const BLR_BOOL: u8 = 23;
    /// Double.
    pub const BLR_DOUBLE: u8 = 27;
    /// Timestamp.
    pub const BLR_TIMESTAMP: u8 = 35;
    /// Variable character data.
    pub const BLR_VARYING: u8 = 37;
    /// End of block.
    pub const BLR_END: u8 = 255;
    /// End of command.
    pub const BLR_EOC: u8 = 76;
}

use op::*;

const HEADER_LEN: usize = 6;
const TRAILER_LEN: usize = 2;
const MAX_FIELD_LEN: usize = 5;

/// Staging size of one column in the XDR row layout.
///
/// The legacy integer form encodes the variants by sign: fixed-width
/// binary columns are negative widths, variable-length columns are `0`, and
/// fixed text is its length plus one so that it never collides with `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoLength {
    /// Fixed-length text of the given byte length.
    Text(usize),
    /// Length travels with the value.
    VariableLength,
    /// Fixed-width binary value of 1, 4 or 8 bytes, not padded.
    FixedBinary(usize),
}

impl IoLength {
    /// Signed encoding expected by existing row buffer builders.
    #[must_use]
    pub fn as_legacy_i32(self) -> i32 {
        match self {
            Self::Text(len) => len as i32 + 1,
            Self::VariableLength => 0,
            Self::FixedBinary(width) => -(width as i32),
        }
    }
}

/// Computes BLR message descriptions for a connection dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlrCalculator {
    dialect: u8,
}

impl BlrCalculator {
    /// Calculator for the given SQL dialect.
    #[must_use]
    pub const fn new(dialect: u8) -> Self {
        Self { dialect }
    }

    /// SQL dialect in use.
    #[must_use]
    pub const fn dialect(&self) -> u8 {
        self.dialect
    }

    fn version_tag(&self) -> u8 {
        if self.dialect <= 1 {
            BLR_VERSION4
        } else {
            BLR_VERSION5
        }
    }

    /// Encode the message description for `row`.
    ///
    /// Fails without producing output when any column type is unknown, a
    /// text length does not fit 16 bits, or the row has more than 32767
    /// columns.
    pub fn calculate_blr(&self, row: &RowDescriptor) -> Result<Bytes, ProtocolError> {
        let params = row.count().saturating_mul(2);
        let par_count = u16::try_from(params).map_err(|_| ProtocolError::ValueTooLong {
            length: params,
            max: usize::from(u16::MAX),
        })?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + TRAILER_LEN + MAX_FIELD_LEN * row.count());

        buf.put_u8(self.version_tag());
        buf.put_u8(BLR_BEGIN);
        buf.put_u8(BLR_MESSAGE);
        buf.put_u8(0);
        buf.put_u16_le(par_count);

        for field in row {
            encode_field(field, &mut buf)?;
            buf.put_u8(BLR_SHORT);
            buf.put_u8(0);
        }

        buf.put_u8(BLR_END);
        buf.put_u8(BLR_EOC);
        Ok(buf.freeze())
    }

    /// Staging size of `field`.
    pub fn io_length(&self, field: &FieldDescriptor) -> Result<IoLength, ProtocolError> {
        io_length(field)
    }
}

impl Default for BlrCalculator {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Length operand of `blr_text`/`blr_varying`.
fn text_length(field: &FieldDescriptor) -> Result<u16, ProtocolError> {
    let length = usize::try_from(field.length()).map_err(|_| ProtocolError::InvalidLength(field.length()))?;
    u16::try_from(length).map_err(|_| ProtocolError::ValueTooLong {
        length,
        max: usize::from(u16::MAX),
    })
}

fn encode_field(field: &FieldDescriptor, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    // Scale travels as a signed byte.
    let scale = field.scale() as u8;
    match field.base_type() {
        SQL_VARYING => {
            let length = text_length(field)?;
            buf.put_u8(BLR_VARYING);
            buf.put_u16_le(length);
        }
        SQL_TEXT => {
            let length = text_length(field)?;
            buf.put_u8(BLR_TEXT);
            buf.put_u16_le(length);
        }
        SQL_NULL => {
            buf.put_u8(BLR_TEXT);
            buf.put_u16_le(0);
        }
        SQL_DOUBLE => buf.put_u8(BLR_DOUBLE),
        SQL_FLOAT => buf.put_u8(BLR_FLOAT),
        SQL_D_FLOAT => buf.put_u8(BLR_D_FLOAT),
        SQL_TYPE_DATE => buf.put_u8(BLR_SQL_DATE),
        SQL_TYPE_TIME => buf.put_u8(BLR_SQL_TIME),
        SQL_TIMESTAMP => buf.put_u8(BLR_TIMESTAMP),
        SQL_BOOLEAN => buf.put_u8(BLR_BOOL),
        SQL_BLOB | SQL_ARRAY | SQL_QUAD => {
            buf.put_u8(BLR_QUAD);
            buf.put_u8(scale);
        }
        SQL_LONG => {
            buf.put_u8(BLR_LONG);
            buf.put_u8(scale);
        }
        SQL_SHORT => {
            buf.put_u8(BLR_SHORT);
            buf.put_u8(scale);
        }
        SQL_INT64 => {
            buf.put_u8(BLR_INT64);
            buf.put_u8(scale);
        }
        _ => {
            return Err(ProtocolError::UnsupportedColumnType {
                type_tag: field.type_tag(),
                code: ISC_DSQL_SQLDA_VALUE_ERR,
            });
        }
    }
    Ok(())
}

/// Staging size of `field` in the XDR row layout.
pub fn io_length(field: &FieldDescriptor) -> Result<IoLength, ProtocolError> {
    let io = match field.base_type() {
        SQL_TEXT => IoLength::Text(field.length().max(0) as usize),
        SQL_NULL | SQL_VARYING => IoLength::VariableLength,
        SQL_SHORT | SQL_LONG | SQL_FLOAT | SQL_TYPE_TIME | SQL_TYPE_DATE => IoLength::FixedBinary(4),
        SQL_DOUBLE | SQL_D_FLOAT | SQL_TIMESTAMP | SQL_BLOB | SQL_ARRAY | SQL_QUAD | SQL_INT64 => {
            IoLength::FixedBinary(8)
        }
        SQL_BOOLEAN => IoLength::FixedBinary(1),
        _ => {
            return Err(ProtocolError::UnsupportedColumnType {
                type_tag: field.type_tag(),
                code: ISC_DSQL_DATATYPE_ERR,
            });
        }
    };
    Ok(io)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::field::RowDescriptor;
    use proptest::prelude::*;

    fn field(type_tag: i32, scale: i32, length: i32) -> FieldDescriptor {
        FieldDescriptor::new(type_tag, 0, scale, length)
    }

    #[test]
    fn test_empty_row() {
        let blr = BlrCalculator::new(3).calculate_blr(&RowDescriptor::empty()).unwrap();
        assert_eq!(&blr[..], &[5, 2, 4, 0, 0, 0, 255, 76]);
    }

    #[test]
    fn test_dialect_one_uses_version4() {
        let blr = BlrCalculator::new(1).calculate_blr(&RowDescriptor::empty()).unwrap();
        assert_eq!(blr[0], BLR_VERSION4);
    }

    #[test]
    fn test_mixed_row_bytes() {
        let row = RowDescriptor::builder()
            .field(field(SQL_VARYING + 1, 0, 300))
            .field(field(SQL_LONG, -2, 4))
            .field(field(SQL_TIMESTAMP, 0, 8))
            .field(field(SQL_BLOB + 1, 0, 8))
            .build();
        let blr = BlrCalculator::new(3).calculate_blr(&row).unwrap();
        assert_eq!(
            &blr[..],
            &[
                5, 2, 4, 0, 8, 0, // header, 4 fields -> 8 parameters
                37, 44, 1, 7, 0, // varying(300)
                8, 254, 7, 0, // long scale -2
                35, 7, 0, // timestamp
                9, 0, 7, 0, // quad
                255, 76,
            ]
        );
    }

    #[test]
    fn test_null_type_is_empty_text() {
        let row = RowDescriptor::builder().field(field(SQL_NULL + 1, 0, 0)).build();
        let blr = BlrCalculator::default().calculate_blr(&row).unwrap();
        assert_eq!(&blr[6..9], &[BLR_TEXT, 0, 0]);
    }

    #[test]
    fn test_unsupported_type_fails() {
        let row = RowDescriptor::builder()
            .field(field(SQL_LONG, 0, 4))
            .field(field(999, 0, 4))
            .build();
        let err = BlrCalculator::default().calculate_blr(&row).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnsupportedColumnType {
                type_tag: 999,
                code: ISC_DSQL_SQLDA_VALUE_ERR
            }
        );
    }

    #[test]
    fn test_text_length_must_fit_u16() {
        let calc = BlrCalculator::default();
        let max = RowDescriptor::builder().field(field(SQL_VARYING, 0, 65_535)).build();
        assert_eq!(&calc.calculate_blr(&max).unwrap()[6..9], &[BLR_VARYING, 255, 255]);

        let row = RowDescriptor::builder()
            .field(field(SQL_LONG, 0, 4))
            .field(field(SQL_TEXT, 0, 65_536))
            .build();
        assert_eq!(
            calc.calculate_blr(&row).unwrap_err(),
            ProtocolError::ValueTooLong {
                length: 65_536,
                max: 65_535
            }
        );

        let negative = RowDescriptor::builder().field(field(SQL_VARYING, 0, -1)).build();
        assert_eq!(calc.calculate_blr(&negative).unwrap_err(), ProtocolError::InvalidLength(-1));
    }

    #[test]
    fn test_too_many_fields() {
        let calc = BlrCalculator::default();
        let build = |count: usize| {
            (0..count)
                .fold(RowDescriptor::builder(), |b, _| b.field(field(SQL_SHORT, 0, 2)))
                .build()
        };
        let blr = calc.calculate_blr(&build(32_767)).unwrap();
        assert_eq!(&blr[4..6], &[0xFE, 0xFF]);

        assert_eq!(
            calc.calculate_blr(&build(32_768)).unwrap_err(),
            ProtocolError::ValueTooLong {
                length: 65_536,
                max: 65_535
            }
        );
    }

    #[test]
    fn test_io_length_legacy_values() {
        let cases = [
            (SQL_TEXT, 10, 11),
            (SQL_VARYING, 10, 0),
            (SQL_NULL, 0, 0),
            (SQL_SHORT, 2, -4),
            (SQL_TYPE_DATE, 4, -4),
            (SQL_INT64, 8, -8),
            (SQL_BLOB, 8, -8),
            (SQL_BOOLEAN, 1, -1),
        ];
        for (type_tag, length, expected) in cases {
            let io = io_length(&field(type_tag, 0, length)).unwrap();
            assert_eq!(io.as_legacy_i32(), expected, "type {type_tag}");
        }
    }

    #[test]
    fn test_io_length_unknown_type() {
        let err = io_length(&field(1, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnsupportedColumnType { code: ISC_DSQL_DATATYPE_ERR, .. }
        ));
    }

    const KNOWN_TYPES: &[i32] = &[
        SQL_VARYING, SQL_TEXT, SQL_NULL, SQL_DOUBLE, SQL_FLOAT, SQL_D_FLOAT, SQL_TYPE_DATE,
        SQL_TYPE_TIME, SQL_TIMESTAMP, SQL_BOOLEAN, SQL_BLOB, SQL_ARRAY, SQL_QUAD, SQL_LONG,
        SQL_SHORT, SQL_INT64,
    ];

    fn operand_len(base_type: i32) -> usize {
        match base_type {
            SQL_VARYING | SQL_TEXT | SQL_NULL => 3,
            SQL_BLOB | SQL_ARRAY | SQL_QUAD | SQL_LONG | SQL_SHORT | SQL_INT64 => 2,
            _ => 1,
        }
    }

    fn arb_field() -> impl Strategy<Value = FieldDescriptor> {
        (
            proptest::sample::select(KNOWN_TYPES),
            any::<bool>(),
            -18i32..=0,
            0i32..=32765,
        )
            .prop_map(|(t, nullable, scale, len)| field(t + i32::from(nullable), scale, len))
    }

    proptest! {
        #[test]
        fn prop_blr_deterministic_and_exact(fields in proptest::collection::vec(arb_field(), 0..40)) {
            let row = RowDescriptor::from(fields);
            let calc = BlrCalculator::new(3);
            let first = calc.calculate_blr(&row).unwrap();
            let second = calc.calculate_blr(&row).unwrap();
            prop_assert_eq!(&first, &second);

            let expected: usize = HEADER_LEN
                + TRAILER_LEN
                + row.iter().map(|f| operand_len(f.base_type()) + 2).sum::<usize>();
            prop_assert_eq!(first.len(), expected);
            prop_assert!(first.len() <= HEADER_LEN + TRAILER_LEN + MAX_FIELD_LEN * row.count());
        }
    }
}
