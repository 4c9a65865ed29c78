//! Split I/O connection with abort support.
//!
//! The transport is split into read and write halves so that an abort or
//! an `op_cancel` can go out while another task is blocked reading a
//! response.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fb_wire::{Request, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::framed::{MessageReader, RequestWriter};
use crate::wire_codec::WireCodec;

/// A Firebird connection with split I/O.
///
/// Requests are written through a mutex-protected writer shared with
/// [`AbortHandle`]s; responses are read by the owner of the connection.
///
/// # Example
///
/// ```rust,ignore
/// use fb_codec::Connection;
/// use fb_wire::Request;
///
/// let mut conn = Connection::new(stream);
/// conn.send(Request::Detach { db_handle: 1 }).await?;
/// let reply = conn.read_message().await?;
/// ```
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: MessageReader<ReadHalf<T>>,
    writer: Arc<Mutex<RequestWriter<WriteHalf<T>>>>,
    abort_notify: Arc<Notify>,
    aborted: Arc<AtomicBool>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a new connection from a transport.
    ///
    /// The transport is immediately split into read and write halves.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, WireCodec::new())
    }

    /// Create a new connection with a custom read codec.
    pub fn with_codec(transport: T, codec: WireCodec) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: MessageReader::with_codec(read_half, codec),
            writer: Arc::new(Mutex::new(RequestWriter::new(write_half))),
            abort_notify: Arc::new(Notify::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle for aborting this connection or cancelling the running
    /// operation from another task.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle<T> {
        AbortHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.abort_notify),
            aborted: Arc::clone(&self.aborted),
        }
    }

    /// Check if the connection was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Get a reference to the read codec.
    pub fn read_codec(&self) -> &WireCodec {
        self.reader.codec()
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Encode and flush one request.
    pub async fn send(&mut self, request: Request) -> Result<(), CodecError> {
        self.send_all([request]).await
    }

    /// Encode several requests and flush them together.
    pub async fn send_all(&mut self, requests: impl IntoIterator<Item = Request>) -> Result<(), CodecError> {
        if self.is_aborted() {
            return Err(CodecError::Aborted);
        }
        let mut writer = self.writer.lock().await;
        for request in requests {
            writer.feed(request).await?;
        }
        writer.flush().await
    }

    /// Read the next server message.
    ///
    /// Returns [`CodecError::Aborted`] as soon as an [`AbortHandle`] fires,
    /// even when the peer never answers, and [`CodecError::ConnectionClosed`]
    /// when the peer closes the stream.
    pub async fn read_message(&mut self) -> Result<ServerMessage, CodecError> {
        let notified = self.abort_notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so an abort in between is seen.
        notified.as_mut().enable();
        if self.is_aborted() {
            return Err(CodecError::Aborted);
        }

        tokio::select! {
            biased;
            () = &mut notified => {
                tracing::debug!("read interrupted by abort");
                Err(CodecError::Aborted)
            }
            next = self.reader.next() => match next {
                Some(result) => result,
                None if self.aborted.load(Ordering::Acquire) => Err(CodecError::Aborted),
                None => Err(CodecError::ConnectionClosed),
            }
        }
    }

    /// Shut down the write half after flushing pending requests.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("aborted", &self.is_aborted())
            .field("buffered", &self.reader.read_buffer().len())
            .finish_non_exhaustive()
    }
}

/// Handle for aborting a connection from another task.
///
/// Cloneable and `Send` when the transport is.
pub struct AbortHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<RequestWriter<WriteHalf<T>>>>,
    notify: Arc<Notify>,
    aborted: Arc<AtomicBool>,
}

impl<T> AbortHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Forcibly close the connection.
    ///
    /// Wakes a task blocked in [`Connection::read_message`] and shuts the
    /// write half down. Returns `false` when the connection was already
    /// aborted.
    pub async fn abort(&self) -> bool {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!("aborting connection");
        self.notify.notify_waiters();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            tracing::debug!(error = %e, "shutdown after abort failed");
        }
        true
    }

    /// Send a request without waiting for the connection owner, used for
    /// `op_cancel` while a response is outstanding.
    pub async fn send_out_of_band(&self, request: Request) -> Result<(), CodecError> {
        if self.is_aborted() {
            return Err(CodecError::Aborted);
        }
        tracing::debug!(operation = ?request.operation(), "sending out-of-band request");
        let mut writer = self.writer.lock().await;
        writer.send(request).await
    }

    /// Check if the connection was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl<T> Clone for AbortHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            aborted: Arc::clone(&self.aborted),
        }
    }
}

impl<T> std::fmt::Debug for AbortHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}
