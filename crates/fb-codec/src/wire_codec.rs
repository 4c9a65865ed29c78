//! Codec for the main database connection.

use bytes::{Buf, BytesMut};
use fb_wire::{Operation, Request, ServerMessage};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default upper bound on a single buffered server message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Firebird wire codec for tokio-util framing.
///
/// Decodes [`ServerMessage`]s and encodes [`Request`]s. Messages carry no
/// length header, so decoding parses from a cursor and consumes nothing
/// until a whole message is available.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_message_size: usize,
}

impl WireCodec {
    /// Create a codec with the default message size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the largest message the decoder buffers before failing.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Configured message size limit.
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Keepalives carry no body.
        while src.len() >= 4 && src[..4] == Operation::Dummy.code().to_be_bytes() {
            src.advance(4);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = &src[..];
        match ServerMessage::decode(&mut cursor) {
            Ok(message) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                tracing::trace!(length = consumed, message = message_kind(&message), "decoded server message");
                Ok(Some(message))
            }
            Err(e) if e.is_incomplete() => {
                if src.len() > self.max_message_size {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        max: self.max_message_size,
                    });
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Request> for WireCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.reserve(64);
        item.encode(dst);

        tracing::trace!(
            operation = ?item.operation(),
            length = dst.len() - start,
            "encoded request"
        );
        Ok(())
    }
}

fn message_kind(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::Accept(_) => "accept",
        ServerMessage::Reject => "reject",
        ServerMessage::Response(_) => "response",
        ServerMessage::Disconnect => "disconnect",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, Bytes};
    use fb_wire::{GenericResponse, StatusVector};

    fn response_bytes(handle: i32, data: &'static [u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        GenericResponse {
            object_handle: handle,
            blob_id: 0,
            data: Bytes::from_static(data),
            status: StatusVector::success(),
        }
        .encode(&mut buf);
        buf
    }

    #[test]
    fn test_decode_response() {
        let mut codec = WireCodec::new();
        let mut data = response_bytes(7, b"abc");

        let message = codec.decode(&mut data).unwrap().unwrap();
        let ServerMessage::Response(response) = message else {
            unreachable!("expected response");
        };
        assert_eq!(response.object_handle, 7);
        assert_eq!(&response.data[..], b"abc");
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_incomplete_keeps_bytes() {
        let mut codec = WireCodec::new();
        let full = response_bytes(1, b"segment data");
        let mut partial = BytesMut::from(&full[..full.len() - 3]);

        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 3);

        partial.extend_from_slice(&full[full.len() - 3..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_dummy_skipped() {
        let mut codec = WireCodec::new();
        let mut data = BytesMut::new();
        data.put_i32(Operation::Dummy.code());
        data.put_i32(Operation::Dummy.code());
        data.extend_from_slice(&response_bytes(3, b""));

        assert!(matches!(codec.decode(&mut data).unwrap(), Some(ServerMessage::Response(_))));
    }

    #[test]
    fn test_unexpected_operation() {
        let mut codec = WireCodec::new();
        let mut data = BytesMut::new();
        data.put_i32(Operation::Attach.code());
        assert!(matches!(codec.decode(&mut data), Err(CodecError::Protocol(_))));
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = WireCodec::new().with_max_message_size(16);
        let full = response_bytes(1, &[0u8; 64]);
        let mut partial = BytesMut::from(&full[..40]);
        assert!(matches!(codec.decode(&mut partial), Err(CodecError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_encode_request() {
        let mut codec = WireCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(Request::Detach { db_handle: 5 }, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0, 0, 0, 21, 0, 0, 0, 5]);
    }
}
