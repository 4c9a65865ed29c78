//! XDR encoding primitives.
//!
//! Integers are big-endian. Opaque buffers and strings carry a 4-byte
//! length prefix and are padded with zero bytes to a multiple of four.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Number of padding bytes following an opaque value of `len` bytes.
#[must_use]
pub const fn padding(len: usize) -> usize {
    (4 - (len & 3)) & 3
}

/// Encoded size of an opaque buffer of `len` bytes, prefix included.
#[must_use]
pub const fn buffer_size(len: usize) -> usize {
    4 + len + padding(len)
}

/// Read a big-endian 32-bit integer.
pub fn read_i32(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

/// Read a big-endian 64-bit integer.
pub fn read_i64(src: &mut impl Buf) -> Result<i64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_i64())
}

/// Read a length-prefixed, padded opaque buffer.
///
/// Nothing is consumed unless the full buffer, padding included, is
/// available.
pub fn read_buffer(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = peek_length(src)?;
    ensure(src, buffer_size(len))?;
    src.advance(4);
    let data = src.copy_to_bytes(len);
    src.advance(padding(len));
    Ok(data)
}

/// Read a length-prefixed string, replacing invalid UTF-8.
pub fn read_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let data = read_buffer(src)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// Skip a length-prefixed, padded opaque buffer.
pub fn skip_buffer(src: &mut impl Buf) -> Result<(), ProtocolError> {
    let len = peek_length(src)?;
    ensure(src, buffer_size(len))?;
    src.advance(buffer_size(len));
    Ok(())
}

/// Write a length-prefixed, padded opaque buffer.
pub fn write_buffer(dst: &mut impl BufMut, data: &[u8]) {
    dst.put_i32(data.len() as i32);
    dst.put_slice(data);
    write_padding(dst, data.len());
}

/// Write a length-prefixed string.
pub fn write_string(dst: &mut impl BufMut, value: &str) {
    write_buffer(dst, value.as_bytes());
}

/// Write zero padding for an opaque value of `len` bytes.
pub fn write_padding(dst: &mut impl BufMut, len: usize) {
    dst.put_bytes(0, padding(len));
}

// Decoders only hand contiguous buffers to these helpers.
fn peek_length(src: &impl Buf) -> Result<usize, ProtocolError> {
    ensure(src, 4)?;
    let chunk = src.chunk();
    if chunk.len() < 4 {
        return Err(ProtocolError::InvalidBuffer("length prefix spans chunks"));
    }
    let raw = i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    usize::try_from(raw).map_err(|_| ProtocolError::InvalidLength(raw))
}

fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        return Err(ProtocolError::incomplete(needed, src.remaining()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(2), 2);
        assert_eq!(padding(3), 1);
        assert_eq!(padding(4), 0);
        assert_eq!(buffer_size(5), 12);
    }

    #[test]
    fn test_buffer_layout() {
        let mut buf = BytesMut::new();
        write_buffer(&mut buf, b"abcde");
        assert_eq!(&buf[..], &[0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]);

        let mut cursor = buf.freeze();
        let data = read_buffer(&mut cursor).unwrap();
        assert_eq!(&data[..], b"abcde");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_read_buffer_incomplete_consumes_nothing() {
        let mut buf = BytesMut::new();
        write_buffer(&mut buf, b"abcde");
        let mut short = &buf[..9];
        let err = read_buffer(&mut short).unwrap_err();
        assert!(err.is_incomplete());
        assert_eq!(short.len(), 9);
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut src: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(read_buffer(&mut src), Err(ProtocolError::InvalidLength(-1)));
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut src: &[u8] = &[0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 1, 0];
        assert_eq!(read_i32(&mut src).unwrap(), 9);
        assert_eq!(read_i64(&mut src).unwrap(), 256);
    }
}
