//! Blob transfer.
//!
//! [`InputBlob`] reads an existing blob segment by segment, [`OutputBlob`]
//! creates a new one. Both implement the object-safe [`Blob`] trait.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Open (via open())
//! Open -> Closed (via close(), transaction end or detach)
//! Open -> Cancelled (via cancel(), output only)
//! Closed -> Open (input only)
//! ```
//!
//! An open blob is registered with its transaction and database: it is
//! closed when the transaction starts to commit, roll back or prepare, and
//! released when the transaction ends or the database detaches.
//!
//! For output blobs `is_eof() == !is_open()`. For input blobs `is_eof()`
//! tracks whether the last segment has been read.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fb_wire::blob::{SEGMENT_EOF, decode_segments};
use fb_wire::codes::ISC_BAD_SEGSTR_TYPE;
use fb_wire::info::{self, ISC_INFO_END};
use fb_wire::{BlobId, BlobParameterBuffer, InfoTarget, MAX_SEGMENT_SIZE, ProtocolError, Request, SeekMode};
use parking_lot::Mutex;

use crate::database::DatabaseShared;
use crate::error::{Error, Result};
use crate::listener::DatabaseListener;
use crate::transaction::{Transaction, TransactionListener, TransactionShared, TransactionState};

/// Largest segment as an `i32` request length.
const MAX_SEGMENT: i32 = MAX_SEGMENT_SIZE as i32;

/// Lifecycle state of a blob handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Not opened yet.
    Created,
    /// Open on the server.
    Open,
    /// Closed.
    Closed,
    /// Cancelled; the blob no longer exists.
    Cancelled,
}

/// Operations shared by input and output blobs.
#[async_trait]
pub trait Blob: Send + Sync {
    /// Blob id; `None` for an output blob not yet opened or cancelled.
    fn blob_id(&self) -> Option<BlobId>;

    /// Current state.
    fn state(&self) -> BlobState;

    /// Server blob handle, 0 when never opened.
    fn handle(&self) -> i32;

    /// Whether this blob is written rather than read.
    fn is_output(&self) -> bool;

    /// Whether the blob is open.
    fn is_open(&self) -> bool {
        self.state() == BlobState::Open
    }

    /// Whether no more data can be read or written.
    fn is_eof(&self) -> bool;

    /// Open the blob on the server.
    async fn open(&self) -> Result<()>;

    /// Read up to `size` bytes of segment data.
    async fn get_segment(&self, size: i32) -> Result<Bytes>;

    /// Write one segment.
    async fn put_segment(&self, segment: &[u8]) -> Result<()>;

    /// Move the read position of a stream blob; returns the new position.
    async fn seek(&self, offset: i32, mode: SeekMode) -> Result<i32>;

    /// Close the blob.
    async fn close(&self) -> Result<()>;

    /// Cancel an output blob.
    async fn cancel(&self) -> Result<()>;

    /// Request blob information items.
    async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes>;

    /// Total length in bytes.
    async fn length(&self) -> Result<i64> {
        let data = self.info(&[info::blob::TOTAL_LENGTH, ISC_INFO_END], 20).await?;
        info::find_integer(&data, info::blob::TOTAL_LENGTH)?
            .ok_or(Error::Protocol(ProtocolError::InvalidBuffer("blob length missing from info response")))
    }
}

struct BlobInner {
    state: BlobState,
    handle: i32,
    blob_id: Option<BlobId>,
    eof: bool,
}

pub(crate) struct BlobShared {
    me: Weak<BlobShared>,
    database: Weak<DatabaseShared>,
    transaction: Weak<TransactionShared>,
    bpb: Option<Bytes>,
    output: bool,
    inner: Mutex<BlobInner>,
}

impl BlobShared {
    fn new(
        database: &Arc<DatabaseShared>,
        transaction: &Transaction,
        blob_id: Option<BlobId>,
        bpb: Option<BlobParameterBuffer>,
        output: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            database: Arc::downgrade(database),
            transaction: transaction.downgrade(),
            bpb: bpb.map(|b| b.to_bytes()),
            output,
            inner: Mutex::new(BlobInner {
                state: BlobState::Created,
                handle: 0,
                blob_id,
                eof: output,
            }),
        })
    }

    fn state(&self) -> BlobState {
        self.inner.lock().state
    }

    fn handle(&self) -> i32 {
        self.inner.lock().handle
    }

    /// Database attached and transaction active.
    fn check_ready(&self) -> Result<(Arc<DatabaseShared>, Transaction)> {
        let db = self.database.upgrade().ok_or(Error::NotAttached)?;
        db.check_attached()?;
        let tx = Transaction::upgrade(&self.transaction).ok_or(Error::TransactionNotActive)?;
        if tx.state() != TransactionState::Active {
            return Err(Error::TransactionNotActive);
        }
        Ok((db, tx))
    }

    fn open_handle(&self) -> Result<i32> {
        let inner = self.inner.lock();
        match inner.state {
            BlobState::Open => Ok(inner.handle),
            _ => Err(Error::NotOpen),
        }
    }

    fn register(&self, db: &DatabaseShared, tx: &Transaction) {
        tx.add_transaction_listener(self.me.clone() as Weak<dyn TransactionListener>);
        db.add_listener(self.me.clone() as Weak<dyn DatabaseListener>);
    }

    fn unregister(&self) {
        if let Some(tx) = Transaction::upgrade(&self.transaction) {
            tx.remove_transaction_listener(&(self.me.clone() as Weak<dyn TransactionListener>));
        }
        if let Some(db) = self.database.upgrade() {
            db.remove_listener(&(self.me.clone() as Weak<dyn DatabaseListener>));
        }
    }

    fn opened(&self, handle: i32, blob_id: Option<BlobId>) {
        let mut inner = self.inner.lock();
        inner.state = BlobState::Open;
        inner.handle = handle;
        inner.eof = false;
        if blob_id.is_some() {
            inner.blob_id = blob_id;
        }
    }

    fn mark_closed(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BlobState::Open {
            inner.state = BlobState::Closed;
            if self.output {
                inner.eof = true;
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let (db, _tx) = self.check_ready()?;
        let blob_handle = self.open_handle()?;
        db.round_trip(Request::CloseBlob { blob_handle }).await?;
        self.mark_closed();
        self.unregister();
        tracing::trace!(handle = blob_handle, "blob closed");
        Ok(())
    }

    /// Close while the transaction is ending; failures are only logged.
    async fn close_for_transaction_end(&self) {
        let Ok(blob_handle) = self.open_handle() else {
            return;
        };
        let db = self.database.upgrade().filter(|db| db.state().is_attached());
        if let Some(db) = db {
            if let Err(e) = db.round_trip(Request::CloseBlob { blob_handle }).await {
                tracing::debug!(handle = blob_handle, error = %e, "ignoring blob close failure at transaction end");
            }
        }
        self.mark_closed();
    }

    fn release(&self) {
        self.mark_closed();
        self.unregister();
    }

    async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes> {
        let (db, _tx) = self.check_ready()?;
        let handle = self.open_handle()?;
        let response = db
            .round_trip(Request::Info {
                target: InfoTarget::Blob,
                handle,
                items: Bytes::copy_from_slice(items),
                max_length,
            })
            .await?;
        Ok(response.data)
    }
}

#[async_trait]
impl TransactionListener for BlobShared {
    async fn transaction_state_changed(
        &self,
        _transaction: &Transaction,
        new_state: TransactionState,
        _previous: TransactionState,
    ) {
        match new_state {
            TransactionState::Committing | TransactionState::RollingBack | TransactionState::Preparing => {
                self.close_for_transaction_end().await;
            }
            TransactionState::Committed | TransactionState::RolledBack => self.release(),
            TransactionState::Active | TransactionState::Prepared => {}
        }
    }
}

impl DatabaseListener for BlobShared {
    fn detached(&self) {
        self.mark_closed();
    }
}

/// A blob opened for reading.
#[derive(Clone)]
pub struct InputBlob {
    shared: Arc<BlobShared>,
}

impl InputBlob {
    pub(crate) fn new(
        database: &Arc<DatabaseShared>,
        transaction: &Transaction,
        blob_id: BlobId,
        bpb: Option<BlobParameterBuffer>,
    ) -> Self {
        Self {
            shared: BlobShared::new(database, transaction, Some(blob_id), bpb, false),
        }
    }

    /// Read all remaining data.
    pub async fn read_to_end(&self) -> Result<Bytes> {
        let mut data = BytesMut::new();
        while !self.is_eof() {
            let segment = self.get_segment(MAX_SEGMENT).await?;
            data.extend_from_slice(&segment);
        }
        Ok(data.freeze())
    }
}

#[async_trait]
impl Blob for InputBlob {
    fn blob_id(&self) -> Option<BlobId> {
        self.shared.inner.lock().blob_id
    }

    fn state(&self) -> BlobState {
        self.shared.state()
    }

    fn handle(&self) -> i32 {
        self.shared.handle()
    }

    fn is_output(&self) -> bool {
        false
    }

    fn is_eof(&self) -> bool {
        self.shared.inner.lock().eof
    }

    async fn open(&self) -> Result<()> {
        let (db, tx) = self.shared.check_ready()?;
        let blob_id = {
            let inner = self.shared.inner.lock();
            if inner.state == BlobState::Open {
                return Err(Error::AlreadyOpen);
            }
            inner.blob_id.unwrap_or(BlobId::NULL)
        };

        let response = db
            .round_trip(Request::OpenBlob {
                tx_handle: tx.handle(),
                blob_id,
                bpb: self.shared.bpb.clone(),
            })
            .await?;
        self.shared.opened(response.object_handle, None);
        self.shared.register(&db, &tx);
        tracing::trace!(handle = response.object_handle, blob_id = blob_id.0, "input blob opened");
        Ok(())
    }

    async fn get_segment(&self, size: i32) -> Result<Bytes> {
        if size <= 0 {
            return Err(Error::InvalidArgument(format!("segment size must be positive, got {size}")));
        }
        let (db, _tx) = self.shared.check_ready()?;
        let blob_handle = self.shared.open_handle()?;

        let response = db
            .round_trip(Request::GetSegment {
                blob_handle,
                length: size.min(MAX_SEGMENT) + 2,
            })
            .await?;
        if response.object_handle == SEGMENT_EOF {
            self.shared.inner.lock().eof = true;
        }
        Ok(decode_segments(&response.data)?)
    }

    async fn put_segment(&self, _segment: &[u8]) -> Result<()> {
        Err(Error::WriteNotSupported)
    }

    async fn seek(&self, offset: i32, mode: SeekMode) -> Result<i32> {
        let (db, _tx) = self.shared.check_ready()?;
        let blob_handle = self.shared.open_handle()?;
        let response = db
            .round_trip(Request::SeekBlob {
                blob_handle,
                mode,
                offset,
            })
            .await
            .map_err(|e| match e {
                Error::Server(server) if server.has_code(ISC_BAD_SEGSTR_TYPE) => Error::SegmentedBlobNotSeekable(server),
                other => other,
            })?;
        Ok(response.object_handle)
    }

    async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    async fn cancel(&self) -> Result<()> {
        Err(Error::FeatureNotSupported("cancel on an input blob".into()))
    }

    async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes> {
        self.shared.info(items, max_length).await
    }
}

impl std::fmt::Debug for InputBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBlob")
            .field("blob_id", &self.blob_id())
            .field("state", &self.state())
            .field("eof", &self.is_eof())
            .finish()
    }
}

/// A blob being written.
#[derive(Clone)]
pub struct OutputBlob {
    shared: Arc<BlobShared>,
}

impl OutputBlob {
    pub(crate) fn new(
        database: &Arc<DatabaseShared>,
        transaction: &Transaction,
        bpb: Option<BlobParameterBuffer>,
    ) -> Self {
        Self {
            shared: BlobShared::new(database, transaction, None, bpb, true),
        }
    }

    /// Write `data`, split into maximum-size segments.
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(MAX_SEGMENT_SIZE) {
            self.put_segment(chunk).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Blob for OutputBlob {
    fn blob_id(&self) -> Option<BlobId> {
        self.shared.inner.lock().blob_id
    }

    fn state(&self) -> BlobState {
        self.shared.state()
    }

    fn handle(&self) -> i32 {
        self.shared.handle()
    }

    fn is_output(&self) -> bool {
        true
    }

    fn is_eof(&self) -> bool {
        self.shared.inner.lock().eof
    }

    async fn open(&self) -> Result<()> {
        let (db, tx) = self.shared.check_ready()?;
        match self.shared.state() {
            BlobState::Created => {}
            BlobState::Open => return Err(Error::AlreadyOpen),
            BlobState::Closed | BlobState::Cancelled => return Err(Error::ReopenNotAllowed),
        }

        let response = db
            .round_trip(Request::CreateBlob {
                tx_handle: tx.handle(),
                bpb: self.shared.bpb.clone(),
            })
            .await?;
        self.shared
            .opened(response.object_handle, Some(BlobId(response.blob_id)));
        self.shared.register(&db, &tx);
        tracing::trace!(handle = response.object_handle, blob_id = response.blob_id, "output blob created");
        Ok(())
    }

    async fn get_segment(&self, _size: i32) -> Result<Bytes> {
        Err(Error::ReadNotSupported)
    }

    async fn put_segment(&self, segment: &[u8]) -> Result<()> {
        if segment.is_empty() || segment.len() > MAX_SEGMENT_SIZE {
            return Err(Error::InvalidArgument(format!(
                "segment length must be 1 to {MAX_SEGMENT_SIZE}, got {}",
                segment.len()
            )));
        }
        let (db, _tx) = self.shared.check_ready()?;
        let blob_handle = self.shared.open_handle()?;
        db.round_trip(Request::PutSegment {
            blob_handle,
            segment: Bytes::copy_from_slice(segment),
        })
        .await?;
        Ok(())
    }

    async fn seek(&self, _offset: i32, _mode: SeekMode) -> Result<i32> {
        Err(Error::FeatureNotSupported("seek on an output blob".into()))
    }

    async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    async fn cancel(&self) -> Result<()> {
        let (db, _tx) = self.shared.check_ready()?;
        let handle = match self.shared.state() {
            BlobState::Open => Some(self.shared.handle()),
            BlobState::Created => None,
            BlobState::Cancelled => return Ok(()),
            BlobState::Closed => return Err(Error::NotOpen),
        };
        if let Some(blob_handle) = handle {
            db.round_trip(Request::CancelBlob { blob_handle }).await?;
        }

        {
            let mut inner = self.shared.inner.lock();
            inner.state = BlobState::Cancelled;
            inner.eof = true;
            inner.blob_id = None;
        }
        self.shared.unregister();
        tracing::trace!("output blob cancelled");
        Ok(())
    }

    async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes> {
        self.shared.info(items, max_length).await
    }
}

impl std::fmt::Debug for OutputBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBlob")
            .field("blob_id", &self.blob_id())
            .field("state", &self.state())
            .field("eof", &self.is_eof())
            .finish()
    }
}
