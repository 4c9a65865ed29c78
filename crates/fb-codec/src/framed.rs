//! Framed message streams for async I/O.
//!
//! - `MessageReader<T>` - read half of the main connection
//! - `RequestWriter<T>` - write half of the main connection
//! - `EventReader<T>` - read half of the auxiliary event connection
//!
//! `Connection` uses the first two over a split transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use fb_wire::{ChannelMessage, Request, ServerMessage};
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::event_codec::EventCodec;
use crate::wire_codec::WireCodec;

pin_project! {
    /// A stream of server messages over the read half of a transport.
    pub struct MessageReader<T> {
        #[pin]
        inner: FramedRead<T, WireCodec>,
    }
}

impl<T> MessageReader<T>
where
    T: AsyncRead,
{
    /// Create a new message reader over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, WireCodec::new())
    }

    /// Create a new message reader with a custom codec.
    pub fn with_codec(transport: T, codec: WireCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &WireCodec {
        self.inner.decoder()
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T> Stream for MessageReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<ServerMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for MessageReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("transport", self.inner.get_ref())
            .field("buffered", &self.inner.read_buffer().len())
            .finish()
    }
}

pin_project! {
    /// A sink of client requests over the write half of a transport.
    pub struct RequestWriter<T> {
        #[pin]
        inner: FramedWrite<T, WireCodec>,
    }
}

impl<T> RequestWriter<T>
where
    T: AsyncWrite,
{
    /// Create a new request writer over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedWrite::new(transport, WireCodec::new()),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Sink<Request> for RequestWriter<T>
where
    T: AsyncWrite + Unpin,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Request) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for RequestWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestWriter")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}

pin_project! {
    /// A stream of auxiliary channel messages.
    pub struct EventReader<T> {
        #[pin]
        inner: FramedRead<T, EventCodec>,
    }
}

impl<T> EventReader<T>
where
    T: AsyncRead,
{
    /// Create a new event reader over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedRead::new(transport, EventCodec::new()),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &EventCodec {
        self.inner.decoder()
    }
}

impl<T> Stream for EventReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<ChannelMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for EventReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader")
            .field("transport", self.inner.get_ref())
            .field("idle", &self.inner.decoder().is_idle())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fb_wire::{EventFrame, GenericResponse, event::encode_event_buffer};
    use futures_util::{SinkExt, StreamExt};

    #[tokio::test]
    async fn test_reader_across_reads() {
        let mut encoded = BytesMut::new();
        GenericResponse::ok(9).encode(&mut encoded);
        GenericResponse::ok(10).encode(&mut encoded);

        let mock = tokio_test::io::Builder::new()
            .read(&encoded[..5])
            .read(&encoded[5..27])
            .read(&encoded[27..])
            .build();
        let mut reader = MessageReader::new(mock);

        for expected in [9, 10] {
            let Some(Ok(ServerMessage::Response(r))) = reader.next().await else {
                unreachable!("expected response");
            };
            assert_eq!(r.object_handle, expected);
        }
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_sends_request() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 39, 0, 0, 0, 3])
            .build();
        let mut writer = RequestWriter::new(mock);
        writer.send(Request::CloseBlob { blob_handle: 3 }).await.unwrap();
    }

    #[tokio::test]
    async fn test_event_reader() {
        let mut encoded = BytesMut::new();
        EventFrame {
            db_handle: 0,
            buffer: encode_event_buffer(&[(b"A", 1)]).unwrap(),
            ast: 0,
            event_id: 2,
        }
        .encode(&mut encoded);
        let encoded: Bytes = encoded.freeze();

        let mock = tokio_test::io::Builder::new()
            .read(&encoded[..7])
            .read(&encoded[7..])
            .build();
        let mut reader = EventReader::new(mock);
        assert!(matches!(reader.next().await, Some(Ok(ChannelMessage::Event(_)))));
        assert!(reader.next().await.is_none());
    }
}
