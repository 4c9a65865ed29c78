//! Database session.
//!
//! A [`Database`] owns the main connection. Every request goes through a
//! single request/response exchange behind an async mutex; transactions,
//! blobs and the event channel reach the session through weak references
//! to its shared state.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use fb_codec::AbortHandle;
use fb_wire::request::encode_transaction_id;
use fb_wire::{
    BlobId, BlobParameterBuffer, Diagnostic, GenericResponse, InfoTarget, ProtocolDescriptor, Request,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::blob::{InputBlob, OutputBlob};
use crate::cancel::{CancelHandle, CancelKind};
use crate::channel::AsynchronousChannel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{self, EventHandle, EventHandler};
use crate::listener::{DatabaseListener, ListenerRegistry};
use crate::state::DatabaseState;
use crate::transaction::{Transaction, TransactionConfig, TransactionState};
use crate::warning::{WarningCallback, WarningDispatcher};
use crate::wire::WireConnection;

/// State shared between a [`Database`] and the objects it creates.
pub(crate) struct DatabaseShared {
    pub(crate) config: Config,
    wire: tokio::sync::Mutex<Option<WireConnection>>,
    abort: Mutex<Option<AbortHandle<TcpStream>>>,
    protocol: Mutex<Option<&'static ProtocolDescriptor>>,
    state: Mutex<DatabaseState>,
    handle: AtomicI32,
    active_transactions: AtomicUsize,
    next_event_id: AtomicI32,
    listeners: ListenerRegistry<dyn DatabaseListener>,
    warnings: WarningDispatcher,
    pub(crate) channel: Mutex<Option<Arc<AsynchronousChannel>>>,
}

impl DatabaseShared {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            wire: tokio::sync::Mutex::new(None),
            abort: Mutex::new(None),
            protocol: Mutex::new(None),
            state: Mutex::new(DatabaseState::Unconnected),
            handle: AtomicI32::new(0),
            active_transactions: AtomicUsize::new(0),
            next_event_id: AtomicI32::new(1),
            listeners: ListenerRegistry::new(),
            warnings: WarningDispatcher::default(),
            channel: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> DatabaseState {
        *self.state.lock()
    }

    pub(crate) fn active_transaction_count(&self) -> usize {
        self.active_transactions.load(Ordering::Acquire)
    }

    pub(crate) fn db_handle(&self) -> i32 {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn protocol(&self) -> Option<&'static ProtocolDescriptor> {
        *self.protocol.lock()
    }

    pub(crate) fn check_attached(&self) -> Result<()> {
        if self.state().is_attached() {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }

    pub(crate) fn add_listener(&self, listener: Weak<dyn DatabaseListener>) {
        self.listeners.add(listener);
    }

    pub(crate) fn remove_listener(&self, listener: &Weak<dyn DatabaseListener>) {
        self.listeners.remove(listener);
    }

    pub(crate) fn next_event_local_id(&self) -> i32 {
        self.next_event_id.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn transaction_started(&self) {
        self.active_transactions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn transaction_ended(&self) {
        // Saturate: a lost connection resets the count while transactions
        // may still report their end.
        let _ = self
            .active_transactions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn handle_warning(&self, warning: &Diagnostic) {
        for listener in self.listeners.snapshot() {
            listener.warning_received(warning);
        }
        self.warnings.dispatch(warning);
    }

    /// Send one request and read its response.
    pub(crate) async fn round_trip(&self, request: Request) -> Result<GenericResponse> {
        self.exchange(vec![request]).await
    }

    /// Send requests together and read one response.
    ///
    /// A transport or protocol failure closes the session.
    pub(crate) async fn exchange(&self, requests: Vec<Request>) -> Result<GenericResponse> {
        let result = {
            let mut guard = self.wire.lock().await;
            let Some(wire) = guard.as_mut() else {
                return Err(match self.state() {
                    DatabaseState::Closed => Error::ConnectionClosed,
                    _ => Error::NotConnected,
                });
            };
            let on_warning = |warning: &Diagnostic| self.handle_warning(warning);
            let result = wire.exchange(requests, &on_warning).await;
            if matches!(&result, Err(e) if e.is_fatal()) {
                guard.take();
            }
            result
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(error = %e, "connection lost");
                self.mark_closed();
            }
        }
        result
    }

    fn notify_detaching(&self) {
        for listener in self.listeners.snapshot() {
            listener.detaching();
        }
    }

    /// Move to Closed and notify listeners. Idempotent.
    pub(crate) fn mark_closed(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), DatabaseState::Closed);
        if previous == DatabaseState::Closed {
            return;
        }

        self.abort.lock().take();
        if let Ok(mut wire) = self.wire.try_lock() {
            wire.take();
        }
        self.active_transactions.store(0, Ordering::Release);

        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }

        if previous == DatabaseState::Attached {
            for listener in self.listeners.snapshot() {
                listener.detached();
            }
        }
        tracing::debug!(previous = %previous, "session closed");
    }

    /// Forget the event channel if it is the one with `id`.
    pub(crate) fn clear_channel(&self, id: u64) {
        let mut channel = self.channel.lock();
        if channel.as_ref().is_some_and(|c| c.id() == id) {
            channel.take();
        }
    }

    async fn attach_or_create(&self, create: bool) -> Result<()> {
        match self.state() {
            DatabaseState::Connected => {}
            DatabaseState::Attached => return Err(Error::AlreadyAttached),
            DatabaseState::Unconnected | DatabaseState::Closed => return Err(Error::NotConnected),
        }

        let dpb = self.config.database_parameter_buffer(create)?;
        let database = self.config.database.clone();
        let request = if create {
            Request::Create { database, dpb }
        } else {
            Request::Attach { database, dpb }
        };
        let response = self.round_trip(request).await?;

        self.handle.store(response.object_handle, Ordering::Release);
        *self.state.lock() = DatabaseState::Attached;
        tracing::debug!(handle = response.object_handle, create = create, "attached");
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.check_attached()?;
        let open = self.active_transactions.load(Ordering::Acquire);
        if open > 0 {
            return Err(Error::OpenTransactions(open));
        }

        self.notify_detaching();
        let result = {
            let mut guard = self.wire.lock().await;
            match guard.take() {
                Some(mut wire) => {
                    let requests = vec![
                        Request::Detach {
                            db_handle: self.db_handle(),
                        },
                        Request::Disconnect,
                    ];
                    let on_warning = |warning: &Diagnostic| self.handle_warning(warning);
                    let result = match wire.send(requests).await {
                        Ok(()) => wire
                            .read_response_within(Some(self.config.timeouts.detach_timeout), &on_warning)
                            .await
                            .map(|_| ()),
                        Err(e) => Err(e),
                    };
                    wire.close().await;
                    result
                }
                None => Err(Error::ConnectionClosed),
            }
        };

        self.mark_closed();
        if let Err(e) = &result {
            tracing::debug!(error = %e, "detach failed, connection closed anyway");
        }
        result
    }

    async fn drop_database(&self) -> Result<()> {
        self.check_attached()?;
        self.notify_detaching();
        self.round_trip(Request::DropDatabase {
            db_handle: self.db_handle(),
        })
        .await?;

        let wire = self.wire.lock().await.take();
        if let Some(wire) = wire {
            wire.close().await;
        }
        self.mark_closed();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }
        let wire = self.wire.lock().await.take();
        if let Some(mut wire) = wire {
            if let Err(e) = wire.send(vec![Request::Disconnect]).await {
                tracing::debug!(error = %e, "disconnect request failed");
            }
            wire.close().await;
        }
        self.mark_closed();
        Ok(())
    }

    pub(crate) async fn cancel_operation(&self, kind: CancelKind) -> Result<()> {
        let protocol = self.protocol().ok_or(Error::NotConnected)?;
        if !protocol.supports(kind.capability()) {
            return Err(Error::FeatureNotSupported(format!(
                "cancel kind {kind:?} on {}",
                protocol.version
            )));
        }
        let abort = self.abort.lock().clone().ok_or(Error::NotConnected)?;

        match kind {
            CancelKind::Abort => {
                if abort.abort().await {
                    tracing::debug!("connection aborted");
                }
                self.mark_closed();
                Ok(())
            }
            _ => {
                tracing::debug!(kind = ?kind, "sending cancel");
                abort
                    .send_out_of_band(Request::Cancel { kind: kind.code() })
                    .await
                    .map_err(Error::from)
            }
        }
    }
}

impl Drop for DatabaseShared {
    fn drop(&mut self) {
        let channel = self.channel.get_mut().take();
        if let Some(channel) = channel {
            channel.close();
        }
    }
}

/// A session with a Firebird database.
///
/// # Example
///
/// ```rust,ignore
/// use fb_client::{Config, Database, TransactionConfig};
///
/// let config = Config::from_connection_string("host=localhost;database=employee;user=SYSDBA;password=masterkey")?;
/// let db = Database::connect(config).await?;
/// db.attach().await?;
///
/// let tx = db.start_transaction(&TransactionConfig::default()).await?;
/// db.execute_immediate("UPDATE t SET x = 1", Some(&tx)).await?;
/// tx.commit().await?;
///
/// db.close().await?;
/// ```
pub struct Database {
    shared: Arc<DatabaseShared>,
}

impl Database {
    /// Connect to the server and negotiate the protocol.
    ///
    /// The returned session is Connected but not attached.
    pub async fn connect(config: Config) -> Result<Self> {
        let wire = WireConnection::connect(&config, &config.database).await?;
        let shared = Arc::new(DatabaseShared::new(config));
        *shared.abort.lock() = Some(wire.abort_handle());
        *shared.protocol.lock() = Some(wire.protocol());
        *shared.wire.lock().await = Some(wire);
        *shared.state.lock() = DatabaseState::Connected;
        Ok(Self { shared })
    }

    /// Connect and attach in one step.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Self::connect(config).await?;
        db.attach().await?;
        Ok(db)
    }

    /// Attach to the configured database.
    pub async fn attach(&self) -> Result<()> {
        self.shared.attach_or_create(false).await
    }

    /// Create the configured database and attach to it.
    pub async fn create_database(&self) -> Result<()> {
        self.shared.attach_or_create(true).await
    }

    /// Detach and close the connection.
    ///
    /// Fails with [`Error::OpenTransactions`] while transactions are active;
    /// the session then stays attached.
    pub async fn close(&self) -> Result<()> {
        self.shared.detach().await
    }

    /// Close the socket without detaching.
    pub async fn disconnect(&self) -> Result<()> {
        self.shared.disconnect().await
    }

    /// Drop the attached database and close the connection.
    pub async fn drop_database(&self) -> Result<()> {
        self.shared.drop_database().await
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> DatabaseState {
        self.shared.state()
    }

    /// Whether a database is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.shared.state().is_attached()
    }

    /// Server database handle, 0 before attach.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.shared.db_handle()
    }

    /// Negotiated protocol.
    #[must_use]
    pub fn protocol(&self) -> Option<&'static ProtocolDescriptor> {
        self.shared.protocol()
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Number of transactions in the Active state.
    #[must_use]
    pub fn active_transaction_count(&self) -> usize {
        self.shared.active_transaction_count()
    }

    /// Start a transaction.
    pub async fn start_transaction(&self, config: &TransactionConfig) -> Result<Transaction> {
        self.shared.check_attached()?;
        let response = self
            .shared
            .round_trip(Request::StartTransaction {
                db_handle: self.shared.db_handle(),
                tpb: config.parameter_buffer(),
            })
            .await?;
        tracing::debug!(handle = response.object_handle, "transaction started");
        Ok(Transaction::new(
            response.object_handle,
            TransactionState::Active,
            &self.shared,
        ))
    }

    /// Reconnect to a limbo transaction by id.
    ///
    /// The returned transaction is in the Prepared state.
    pub async fn reconnect_transaction(&self, transaction_id: i64) -> Result<Transaction> {
        self.shared.check_attached()?;
        let response = self
            .shared
            .round_trip(Request::Reconnect {
                db_handle: self.shared.db_handle(),
                transaction_id: encode_transaction_id(transaction_id),
            })
            .await?;
        tracing::debug!(id = transaction_id, handle = response.object_handle, "transaction reconnected");
        Ok(Transaction::new(
            response.object_handle,
            TransactionState::Prepared,
            &self.shared,
        ))
    }

    /// Execute a statement without preparing it.
    pub async fn execute_immediate(&self, sql: &str, transaction: Option<&Transaction>) -> Result<()> {
        self.shared.check_attached()?;
        let tx_handle = match transaction {
            Some(tx) if tx.state() != TransactionState::Active => return Err(Error::TransactionNotActive),
            Some(tx) => tx.handle(),
            None => 0,
        };
        self.shared
            .round_trip(Request::ExecImmediate {
                tx_handle,
                db_handle: self.shared.db_handle(),
                dialect: i32::from(self.shared.config.dialect),
                statement: sql.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Request database information items.
    pub async fn info(&self, items: &[u8], max_length: i32) -> Result<Bytes> {
        self.shared.check_attached()?;
        let response = self
            .shared
            .round_trip(Request::Info {
                target: InfoTarget::Database,
                handle: self.shared.db_handle(),
                items: Bytes::copy_from_slice(items),
                max_length,
            })
            .await?;
        Ok(response.data)
    }

    /// Create a blob for writing in `transaction`.
    pub fn create_blob_for_output(
        &self,
        transaction: &Transaction,
        bpb: Option<BlobParameterBuffer>,
    ) -> Result<OutputBlob> {
        self.shared.check_attached()?;
        Ok(OutputBlob::new(&self.shared, transaction, bpb))
    }

    /// Create a handle for reading blob `blob_id` in `transaction`.
    pub fn create_blob_for_input(
        &self,
        transaction: &Transaction,
        blob_id: BlobId,
        bpb: Option<BlobParameterBuffer>,
    ) -> Result<InputBlob> {
        self.shared.check_attached()?;
        Ok(InputBlob::new(&self.shared, transaction, blob_id, bpb))
    }

    /// Create an event handle; call [`queue_event`](Self::queue_event) to
    /// start receiving notifications.
    pub fn create_event_handle(&self, name: &str, handler: impl EventHandler + 'static) -> Result<EventHandle> {
        EventHandle::new(name, &self.shared.config.charset, Arc::new(handler))
    }

    /// Register interest in the event of `handle`.
    ///
    /// The first call sets up the auxiliary event channel.
    pub async fn queue_event(&self, handle: &EventHandle) -> Result<()> {
        event::queue_event(&self.shared, handle).await
    }

    /// Cancel a queued event.
    pub async fn cancel_event(&self, handle: &EventHandle) -> Result<()> {
        event::cancel_event(&self.shared, handle).await
    }

    /// Number of notifications since the previous count.
    #[must_use]
    pub fn count_events(&self, handle: &EventHandle) -> i32 {
        handle.count_delta()
    }

    /// The event channel, once set up.
    #[must_use]
    pub fn event_channel(&self) -> Option<Arc<AsynchronousChannel>> {
        self.shared.channel.lock().clone()
    }

    /// Cancel the running operation or abort the connection.
    pub async fn cancel_operation(&self, kind: CancelKind) -> Result<()> {
        self.shared.cancel_operation(kind).await
    }

    /// Get a handle for cancelling from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::downgrade(&self.shared))
    }

    /// Route warnings to `callback`.
    pub fn set_warning_callback(&self, callback: impl WarningCallback + 'static) {
        self.shared.warnings.set(Some(Arc::new(callback)));
    }

    /// Drop warnings again.
    pub fn clear_warning_callback(&self) {
        self.shared.warnings.set(None);
    }

    /// Register a lifecycle listener. The session holds it weakly.
    pub fn add_database_listener(&self, listener: Weak<dyn DatabaseListener>) {
        self.shared.add_listener(listener);
    }

    /// Unregister a lifecycle listener.
    pub fn remove_database_listener(&self, listener: &Weak<dyn DatabaseListener>) {
        self.shared.remove_listener(listener);
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("state", &self.shared.state())
            .field("handle", &self.shared.db_handle())
            .field("protocol", &self.shared.protocol().map(|p| p.version))
            .finish_non_exhaustive()
    }
}
