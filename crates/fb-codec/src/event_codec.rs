//! Codec for the auxiliary event connection.

use bytes::BytesMut;
use fb_wire::{ChannelMessage, EventFrameDecoder};
use tokio_util::codec::Decoder;

use crate::error::CodecError;

/// Decoder for messages pushed over the auxiliary connection.
///
/// Wraps the resumable [`EventFrameDecoder`], so frames split across any
/// number of reads decode the same as contiguous input.
#[derive(Debug, Default)]
pub struct EventCodec {
    decoder: EventFrameDecoder,
}

impl EventCodec {
    /// Create a codec positioned at a frame boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no frame is partially decoded.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.decoder.is_idle()
    }
}

impl Decoder for EventCodec {
    type Item = ChannelMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let message = self.decoder.decode(src)?;
        if let Some(ChannelMessage::Event(frame)) = &message {
            tracing::trace!(
                event_id = frame.event_id,
                length = frame.buffer.len(),
                "decoded event frame"
            );
        }
        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None if src.is_empty() && self.decoder.is_idle() => Ok(None),
            None => {
                tracing::debug!(remaining = src.len(), "event channel closed inside a frame");
                Err(CodecError::ConnectionClosed)
            }
        }
    }
}
