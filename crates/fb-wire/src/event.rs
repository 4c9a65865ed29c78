//! Event notification frames and event parameter buffers.
//!
//! The server pushes `op_event` frames over the auxiliary connection:
//!
//! ```text
//! op(4) | db_handle(4) | len(4) buffer(len) padding | ast(8) | event_id(4)
//! ```
//!
//! Frames can arrive split across any number of socket reads.
//! [`EventFrameDecoder`] consumes one field at a time and keeps decoded
//! fields in its own state, so a frame is never rescanned and the decoded
//! sequence does not depend on how the input was chunked.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::opcode::Operation;
use crate::xdr;

/// Event parameter buffer version.
pub const EPB_VERSION1: u8 = 1;

/// Largest event buffer accepted in a frame.
pub const MAX_EVENT_BUFFER: usize = 65_535;

/// A fully decoded `op_event` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Database handle on the server (unused by the client).
    pub db_handle: i32,
    /// Event description buffer with the updated counts.
    pub buffer: Bytes,
    /// AST routine address (unused by the client).
    pub ast: i64,
    /// Server-assigned event id.
    pub event_id: i32,
}

impl EventFrame {
    /// Encode the frame including the operation code.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i32(Operation::Event.code());
        dst.put_i32(self.db_handle);
        xdr::write_buffer(dst, &self.buffer);
        dst.put_i64(self.ast);
        dst.put_i32(self.event_id);
    }

    /// Parse the counts carried in the event buffer.
    pub fn counts(&self) -> Result<Vec<EventCount>, ProtocolError> {
        parse_event_buffer(&self.buffer)
    }
}

/// A message read from the auxiliary channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Event notification.
    Event(EventFrame),
    /// The server closed the channel (`op_exit` or `op_disconnect`).
    Closed,
    /// An operation the channel does not handle.
    Unknown(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Operation,
    DatabaseHandle,
    BufferLength,
    Buffer { len: usize },
    Ast,
    EventId,
}

/// Resumable decoder for auxiliary channel messages.
#[derive(Debug)]
pub struct EventFrameDecoder {
    state: DecodeState,
    db_handle: i32,
    buffer: Bytes,
    ast: i64,
}

impl EventFrameDecoder {
    /// Decoder positioned at a frame boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Operation,
            db_handle: 0,
            buffer: Bytes::new(),
            ast: 0,
        }
    }

    /// Whether the decoder sits between frames.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Operation
    }

    /// Decode the next message from `src`.
    ///
    /// Complete fields are removed from `src`; a partial field stays in it
    /// untouched. Returns `Ok(None)` when more input is needed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ChannelMessage>, ProtocolError> {
        loop {
            match self.state {
                DecodeState::Operation => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let op = src.get_i32();
                    match Operation::from_i32(op) {
                        Ok(Operation::Dummy) => continue,
                        Ok(Operation::Exit | Operation::Disconnect) => {
                            return Ok(Some(ChannelMessage::Closed));
                        }
                        Ok(Operation::Event) => self.state = DecodeState::DatabaseHandle,
                        _ => return Ok(Some(ChannelMessage::Unknown(op))),
                    }
                }
                DecodeState::DatabaseHandle => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    self.db_handle = src.get_i32();
                    self.state = DecodeState::BufferLength;
                }
                DecodeState::BufferLength => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let raw = src.get_i32();
                    let len = usize::try_from(raw)
                        .ok()
                        .filter(|&len| len <= MAX_EVENT_BUFFER)
                        .ok_or(ProtocolError::InvalidLength(raw))?;
                    self.state = DecodeState::Buffer { len };
                }
                DecodeState::Buffer { len } => {
                    let total = len + xdr::padding(len);
                    if src.len() < total {
                        src.reserve(total - src.len());
                        return Ok(None);
                    }
                    self.buffer = src.split_to(len).freeze();
                    src.advance(xdr::padding(len));
                    self.state = DecodeState::Ast;
                }
                DecodeState::Ast => {
                    if src.len() < 8 {
                        return Ok(None);
                    }
                    self.ast = src.get_i64();
                    self.state = DecodeState::EventId;
                }
                DecodeState::EventId => {
                    if src.len() < 4 {
                        return Ok(None);
                    }
                    let event_id = src.get_i32();
                    self.state = DecodeState::Operation;
                    return Ok(Some(ChannelMessage::Event(EventFrame {
                        db_handle: self.db_handle,
                        buffer: core::mem::take(&mut self.buffer),
                        ast: self.ast,
                        event_id,
                    })));
                }
            }
        }
    }
}

impl Default for EventFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// One `(name, count)` entry of an event buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCount {
    /// Event name in the connection character set.
    pub name: Bytes,
    /// Number of times the event has been posted.
    pub count: i32,
}

/// Build an event parameter buffer for the given names and known counts.
pub fn encode_event_buffer(events: &[(&[u8], i32)]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(1 + events.iter().map(|(n, _)| n.len() + 5).sum::<usize>());
    buf.put_u8(EPB_VERSION1);
    for (name, count) in events {
        let len = u8::try_from(name.len()).map_err(|_| ProtocolError::ValueTooLong {
            length: name.len(),
            max: u8::MAX as usize,
        })?;
        buf.put_u8(len);
        buf.put_slice(name);
        buf.put_i32_le(*count);
    }
    Ok(buf.freeze())
}

/// Parse an event parameter buffer.
pub fn parse_event_buffer(buffer: &[u8]) -> Result<Vec<EventCount>, ProtocolError> {
    let Some((&version, mut rest)) = buffer.split_first() else {
        return Err(ProtocolError::InvalidBuffer("empty event buffer"));
    };
    if version != EPB_VERSION1 {
        return Err(ProtocolError::InvalidBuffer("unknown event buffer version"));
    }
    let mut counts = Vec::new();
    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if tail.len() < len + 4 {
            return Err(ProtocolError::InvalidBuffer("truncated event entry"));
        }
        let name = Bytes::copy_from_slice(&tail[..len]);
        let count = i32::from_le_bytes([tail[len], tail[len + 1], tail[len + 2], tail[len + 3]]);
        counts.push(EventCount { name, count });
        rest = &tail[len + 4..];
    }
    Ok(counts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(name: &[u8], count: i32, event_id: i32) -> EventFrame {
        EventFrame {
            db_handle: 0,
            buffer: encode_event_buffer(&[(name, count)]).unwrap(),
            ast: 0,
            event_id,
        }
    }

    fn encoded(frames: &[EventFrame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for f in frames {
            f.encode(&mut buf);
        }
        buf.to_vec()
    }

    fn decode_chunks(data: &[u8], cuts: &[usize]) -> Vec<ChannelMessage> {
        let mut decoder = EventFrameDecoder::new();
        let mut acc = BytesMut::new();
        let mut out = Vec::new();
        let mut start = 0;
        let mut bounds: Vec<usize> = cuts.iter().copied().filter(|&c| c > 0 && c < data.len()).collect();
        bounds.sort_unstable();
        bounds.dedup();
        bounds.push(data.len());
        for end in bounds {
            acc.extend_from_slice(&data[start..end]);
            start = end;
            while let Some(msg) = decoder.decode(&mut acc).unwrap() {
                out.push(msg);
            }
        }
        assert!(decoder.is_idle());
        assert!(acc.is_empty());
        out
    }

    #[test]
    fn test_event_buffer_layout() {
        let buf = encode_event_buffer(&[(b"EVT", 5)]).unwrap();
        assert_eq!(&buf[..], &[1, 3, b'E', b'V', b'T', 5, 0, 0, 0]);
        let counts = parse_event_buffer(&buf).unwrap();
        assert_eq!(counts[0].count, 5);
        assert_eq!(&counts[0].name[..], b"EVT");
    }

    #[test]
    fn test_multiple_names() {
        let buf = encode_event_buffer(&[(b"A", 1), (b"BB", 2)]).unwrap();
        let counts = parse_event_buffer(&buf).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[1].count, 2);
    }

    #[test]
    fn test_byte_at_a_time() {
        let f = frame(b"TEST_EVENT", 1, 7);
        let data = encoded(&[f.clone()]);
        let cuts: Vec<usize> = (1..data.len()).collect();
        assert_eq!(decode_chunks(&data, &cuts), vec![ChannelMessage::Event(f)]);
    }

    #[test]
    fn test_dummy_skipped_and_exit() {
        let mut buf = BytesMut::new();
        buf.put_i32(Operation::Dummy.code());
        frame(b"E", 1, 1).encode(&mut buf);
        buf.put_i32(Operation::Exit.code());

        let mut decoder = EventFrameDecoder::new();
        assert!(matches!(decoder.decode(&mut buf).unwrap(), Some(ChannelMessage::Event(_))));
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(ChannelMessage::Closed));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_operation_reported() {
        let mut buf = BytesMut::new();
        buf.put_i32(1234);
        let mut decoder = EventFrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(ChannelMessage::Unknown(1234)));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(Operation::Event.code());
        buf.put_i32(0);
        buf.put_i32(-5);
        let mut decoder = EventFrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf), Err(ProtocolError::InvalidLength(-5)));
    }

    #[test]
    fn test_1024_frames_monotonic() {
        let frames: Vec<_> = (1..=1024).map(|i| frame(b"COUNTER", i, 3)).collect();
        let data = encoded(&frames);
        let cuts: Vec<usize> = (0..data.len()).step_by(13).collect();
        let mut last = 0;
        for msg in decode_chunks(&data, &cuts) {
            let ChannelMessage::Event(f) = msg else {
                panic!("expected event");
            };
            let count = f.counts().unwrap()[0].count;
            assert!(count > last);
            last = count;
        }
        assert_eq!(last, 1024);
    }

    proptest! {
        #[test]
        fn prop_split_invariance(
            name in proptest::collection::vec(any::<u8>(), 0..40),
            count in any::<i32>(),
            event_id in any::<i32>(),
            cuts in proptest::collection::vec(0usize..128, 0..16),
        ) {
            let f = frame(&name, count, event_id);
            let data = encoded(&[f.clone()]);
            let decoded = decode_chunks(&data, &cuts);
            prop_assert_eq!(decoded, vec![ChannelMessage::Event(f)]);
        }
    }
}
