//! Mock Firebird server for integration testing.
//!
//! The server speaks enough of the wire protocol to drive the client end to
//! end without a real database:
//!
//! - protocol negotiation, with a configurable highest version
//! - attach, create, detach and drop, with optional credential checks
//! - transactions and `op_exec_immediate` (statements are recorded, not run)
//! - segmented and stream blobs held in memory and shared by all connections
//! - the auxiliary event channel, with events posted from the test and
//!   backlogged counts reported as soon as an event is queued
//! - the service manager calls
//!
//! Failures, warnings and stalled operations are injected per operation
//! code through [`MockServerBuilder`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::Database;
//! use fb_testing::MockFbServer;
//!
//! #[tokio::test]
//! async fn test_attach() {
//!     let server = MockFbServer::builder().build().await.unwrap();
//!     let db = Database::open(server.client_config()).await.unwrap();
//!     db.close().await.unwrap();
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use fb_client::Config;
use fb_wire::blob::{SEGMENT_EOF, SEGMENT_INCOMPLETE, encode_segment};
use fb_wire::codes::{
    ISC_BAD_DB_HANDLE, ISC_BAD_SEGSTR_HANDLE, ISC_BAD_SEGSTR_ID, ISC_BAD_SEGSTR_TYPE, ISC_BAD_TRANS_HANDLE,
    ISC_CANCELLED, ISC_LOGIN, ISC_WISH_LIST, ISC_SEGSTR_NO_OP, ISC_SEGSTR_NO_READ, ISC_SEGSTR_NO_WRITE,
};
use fb_wire::event::{encode_event_buffer, parse_event_buffer};
use fb_wire::info::{self, ISC_INFO_END};
use fb_wire::params::{dpb, parse_items, spb};
use fb_wire::{
    AcceptPacket, BlobId, BlobParameterBuffer, BlobType, EventFrame, GenericResponse, InfoTarget, OfferedProtocol,
    Operation, ProtocolError, ProtocolVersion, Request, SeekMode, StatusArgument, StatusVector, cancel_kind,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// How long the server waits for the client to open the event channel.
const AUX_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Database path reported to clients built with [`MockFbServer::client_config`].
pub const MOCK_DATABASE: &str = "mock.fdb";

/// Error type for mock server operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed message from the client.
    #[error("wire error: {0}")]
    Wire(#[from] ProtocolError),

    /// Protocol sequence error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server already stopped.
    #[error("server already stopped")]
    Stopped,
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Configuration for the mock server.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    max_protocol: ProtocolVersion,
    reject_connect: bool,
    credentials: Option<(String, String)>,
    failures: HashMap<Operation, StatusVector>,
    warnings: HashMap<Operation, StatusVector>,
    stalls: HashSet<Operation>,
    server_version: String,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            max_protocol: ProtocolVersion::V13,
            reject_connect: false,
            credentials: None,
            failures: HashMap::new(),
            warnings: HashMap::new(),
            stalls: HashSet::new(),
            server_version: "LI-V4.0.5 Firebird 4.0 (mock)".to_string(),
        }
    }
}

/// Builder for [`MockFbServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest protocol version the server accepts.
    pub fn with_protocol(mut self, version: ProtocolVersion) -> Self {
        self.config.max_protocol = version;
        self
    }

    /// Require these credentials on attach, create and service attach.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((user.into(), password.into()));
        self
    }

    /// Answer every `op_connect` with `op_reject`.
    pub fn reject_connections(mut self) -> Self {
        self.config.reject_connect = true;
        self
    }

    /// Fail every request with `operation` with `status`.
    pub fn fail_on(mut self, operation: Operation, status: StatusVector) -> Self {
        self.config.failures.insert(operation, status);
        self
    }

    /// Attach `status` as warnings to successful responses to `operation`.
    pub fn warn_on(mut self, operation: Operation, status: StatusVector) -> Self {
        self.config.warnings.insert(operation, status);
        self
    }

    /// Never answer `operation` until the client raises a cancel.
    pub fn stall_on(mut self, operation: Operation) -> Self {
        self.config.stalls.insert(operation);
        self
    }

    /// Version string returned for the service manager version item.
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockFbServer> {
        MockFbServer::start(self.config).await
    }
}

#[derive(Debug, Default)]
struct StoredBlob {
    segments: Vec<Bytes>,
    stream: bool,
}

impl StoredBlob {
    fn contents(&self) -> Bytes {
        match self.segments.as_slice() {
            [single] => single.clone(),
            segments => Bytes::from(segments.concat()),
        }
    }
}

#[derive(Debug)]
struct Registration {
    connection: u64,
    db_handle: i32,
    local_id: i32,
    names: Vec<String>,
}

type AuxWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

#[derive(Default)]
struct State {
    next_handle: i32,
    next_blob_id: i64,
    blobs: HashMap<i64, StoredBlob>,
    event_counts: HashMap<String, i32>,
    channels: HashMap<u64, AuxWriter>,
    registrations: Vec<Registration>,
    requests: Vec<Operation>,
    statements: Vec<String>,
    service_actions: usize,
}

impl State {
    fn allocate_handle(&mut self) -> i32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn allocate_blob_id(&mut self) -> i64 {
        self.next_blob_id += 1;
        0x8000_0000 + self.next_blob_id
    }
}

struct Shared {
    config: MockServerConfig,
    state: Mutex<State>,
    next_connection: AtomicU64,
    connections: AtomicUsize,
    stopped: AtomicBool,
}

/// A mock Firebird server for testing.
///
/// Blobs and events are shared across connections, so a blob written by
/// one session can be read by another and events reach every connection
/// that queued them.
pub struct MockFbServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockFbServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State::default()),
            next_connection: AtomicU64::new(1),
            connections: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        });

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            shared: Arc::clone(&shared),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&shared);
                                tokio::spawn(async move {
                                    let id = shared.next_connection.fetch_add(1, Ordering::Relaxed);
                                    shared.connections.fetch_add(1, Ordering::AcqRel);
                                    tracing::debug!(connection = id, peer = %peer, "mock connection accepted");
                                    if let Err(e) = handle_connection(stream, id, &shared).await {
                                        tracing::debug!(connection = id, error = %e, "mock connection error");
                                    }
                                    shared.connections.fetch_sub(1, Ordering::AcqRel);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "mock accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// The server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client configuration pointing at this server, with the configured
    /// credentials when there are any.
    pub fn client_config(&self) -> Config {
        let (user, password) = self
            .shared
            .config
            .credentials
            .clone()
            .unwrap_or_else(|| ("SYSDBA".to_string(), "masterkey".to_string()));
        Config::new()
            .host(self.host())
            .port(self.port())
            .database(MOCK_DATABASE)
            .credentials(user, password)
    }

    /// Number of open client connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Acquire)
    }

    /// Store a blob and return its id.
    ///
    /// Segmented blobs keep the segment boundaries; stream blobs are kept as
    /// one contiguous buffer.
    pub fn insert_blob<I, S>(&self, segments: I, blob_type: BlobType) -> BlobId
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let segments: Vec<Bytes> = segments
            .into_iter()
            .map(|s| Bytes::copy_from_slice(s.as_ref()))
            .collect();
        let stream = blob_type == BlobType::Stream;
        let blob = StoredBlob {
            segments: if stream { vec![Bytes::from(segments.concat())] } else { segments },
            stream,
        };
        let mut state = self.shared.state.lock();
        let id = state.allocate_blob_id();
        state.blobs.insert(id, blob);
        BlobId(id)
    }

    /// Full contents of a stored blob.
    pub fn blob_contents(&self, id: BlobId) -> Option<Bytes> {
        self.shared.state.lock().blobs.get(&id.0).map(StoredBlob::contents)
    }

    /// Segments of a stored blob, as written.
    pub fn blob_segments(&self, id: BlobId) -> Option<Vec<Bytes>> {
        self.shared.state.lock().blobs.get(&id.0).map(|b| b.segments.clone())
    }

    /// Every operation received so far, in order.
    pub fn requests(&self) -> Vec<Operation> {
        self.shared.state.lock().requests.clone()
    }

    /// Whether `operation` has been received.
    pub fn received(&self, operation: Operation) -> bool {
        self.shared.state.lock().requests.contains(&operation)
    }

    /// Statements received through `op_exec_immediate`.
    pub fn statements(&self) -> Vec<String> {
        self.shared.state.lock().statements.clone()
    }

    /// Number of service actions started.
    pub fn service_action_count(&self) -> usize {
        self.shared.state.lock().service_actions
    }

    /// Number of queued event registrations.
    pub fn registration_count(&self) -> usize {
        self.shared.state.lock().registrations.len()
    }

    /// Number of open event channels.
    pub fn event_channel_count(&self) -> usize {
        self.shared.state.lock().channels.len()
    }

    /// Post `name` once and notify every registration that queued it.
    ///
    /// Returns the number of notifications delivered.
    pub async fn post_event(&self, name: &str) -> Result<usize> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(MockServerError::Stopped);
        }

        let (count, targets) = {
            let mut state = self.shared.state.lock();
            let count = {
                let count = state.event_counts.entry(name.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let targets: Vec<(AuxWriter, i32, i32)> = state
                .registrations
                .iter()
                .filter(|r| r.names.iter().any(|n| n == name))
                .filter_map(|r| {
                    let writer = state.channels.get(&r.connection)?;
                    Some((Arc::clone(writer), r.db_handle, r.local_id))
                })
                .collect();
            (count, targets)
        };

        let buffer = encode_event_buffer(&[(name.as_bytes(), count)])?;
        let mut delivered = 0;
        for (writer, db_handle, local_id) in targets {
            match send_event_frame(&writer, db_handle, local_id, buffer.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(local_id = local_id, error = %e, "event delivery failed"),
            }
        }
        tracing::trace!(name = name, count = count, delivered = delivered, "event posted");
        Ok(delivered)
    }

    /// Send `op_exit` on every event channel and close them.
    ///
    /// Returns the number of channels closed.
    pub async fn close_event_channels(&self) -> usize {
        let channels: Vec<AuxWriter> = {
            let mut state = self.shared.state.lock();
            state.registrations.clear();
            state.channels.drain().map(|(_, writer)| writer).collect()
        };
        let closed = channels.len();
        for writer in channels {
            let mut writer = writer.lock().await;
            let exit = Operation::Exit.code().to_be_bytes();
            if let Err(e) = writer.write_all(&exit).await {
                tracing::debug!(error = %e, "op_exit not sent");
            }
            let _ = writer.shutdown().await;
        }
        closed
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockFbServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MockFbServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFbServer")
            .field("addr", &self.addr)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// Read position in a blob opened for reading.
#[derive(Debug)]
struct ReadCursor {
    segments: Vec<Bytes>,
    stream: bool,
    segment: usize,
    offset: usize,
}

impl ReadCursor {
    fn new(blob: &StoredBlob) -> Self {
        Self {
            segments: blob.segments.clone(),
            stream: blob.stream,
            segment: 0,
            offset: 0,
        }
    }

    fn total_length(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    /// Fill up to `length` bytes of `[len u16 LE][data]` segments.
    fn fill(&mut self, length: usize) -> (i32, Bytes) {
        let mut out = BytesMut::with_capacity(length);
        let mut status = 0;
        while self.segment < self.segments.len() {
            let room = length.saturating_sub(out.len());
            if room <= 2 {
                break;
            }
            let rest = &self.segments[self.segment][self.offset..];
            if rest.len() + 2 <= room {
                encode_segment(&mut out, rest);
                self.segment += 1;
                self.offset = 0;
            } else {
                let take = room - 2;
                encode_segment(&mut out, &rest[..take]);
                self.offset += take;
                status = SEGMENT_INCOMPLETE;
                break;
            }
        }
        if self.segment >= self.segments.len() {
            status = SEGMENT_EOF;
        }
        (status, out.freeze())
    }

    fn position(&self) -> usize {
        if self.segment >= self.segments.len() {
            self.total_length()
        } else {
            self.offset
        }
    }

    /// Move a stream blob's position; returns the new position.
    fn seek(&mut self, mode: SeekMode, offset: i32) -> i32 {
        let total = i64::try_from(self.total_length()).unwrap_or(i64::MAX);
        let base = match mode {
            SeekMode::Absolute => 0,
            SeekMode::Relative => i64::try_from(self.position()).unwrap_or(i64::MAX),
            SeekMode::FromEnd => total,
        };
        let target = (base + i64::from(offset)).clamp(0, total);
        if target == total {
            self.segment = self.segments.len();
            self.offset = 0;
        } else {
            self.segment = 0;
            self.offset = usize::try_from(target).unwrap_or(0);
        }
        i32::try_from(target).unwrap_or(i32::MAX)
    }
}

#[derive(Debug)]
enum OpenBlob {
    Read(ReadCursor),
    Write {
        blob_id: i64,
        stream: bool,
        segments: Vec<Bytes>,
    },
}

/// Result of serving one request: a response or a server-side error.
type Outcome = std::result::Result<GenericResponse, StatusVector>;

enum Flow {
    Continue,
    Close,
}

/// Per-connection server state.
struct Session<'a> {
    id: u64,
    shared: &'a Shared,
    db_handle: Option<i32>,
    service_handle: Option<i32>,
    transactions: HashSet<i32>,
    blobs: HashMap<i32, OpenBlob>,
    stalled: Option<Operation>,
}

/// Serve one client connection until it disconnects.
async fn handle_connection(mut stream: TcpStream, id: u64, shared: &Shared) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut session = Session {
        id,
        shared,
        db_handle: None,
        service_handle: None,
        transactions: HashSet::new(),
        blobs: HashMap::new(),
        stalled: None,
    };

    let result = session.serve(&mut stream).await;
    session.teardown().await;
    result
}

impl Session<'_> {
    async fn serve(&mut self, stream: &mut TcpStream) -> Result<()> {
        let mut buf = BytesMut::with_capacity(8192);
        loop {
            let request = match read_request(stream, &mut buf).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(MockServerError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => return Ok(()),
                Err(e) => return Err(e),
            };
            let operation = request.operation();
            tracing::trace!(connection = self.id, operation = ?operation, "mock request");
            self.shared.state.lock().requests.push(operation);

            if let Flow::Close = self.dispatch(request, stream).await? {
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, request: Request, stream: &mut TcpStream) -> Result<Flow> {
        let operation = request.operation();
        match &request {
            Request::Disconnect => return Ok(Flow::Close),
            Request::Connect { protocols, .. } => {
                let mut out = BytesMut::new();
                match self.negotiate(protocols) {
                    Some(accept) => accept.encode(&mut out),
                    None => out.put_i32(Operation::Reject.code()),
                }
                stream.write_all(&out).await?;
                return Ok(Flow::Continue);
            }
            Request::Cancel { kind } => {
                self.cancel(*kind, stream).await?;
                return Ok(Flow::Continue);
            }
            _ => {}
        }

        if self.shared.config.stalls.contains(&operation) {
            tracing::debug!(connection = self.id, operation = ?operation, "stalling request");
            self.stalled = Some(operation);
            return Ok(Flow::Continue);
        }
        if let Some(status) = self.shared.config.failures.get(&operation) {
            write_response(stream, &error_response(status.clone())).await?;
            return Ok(Flow::Continue);
        }

        let outcome = match request {
            Request::ConnectRequest { db_handle } => {
                self.connect_request(db_handle, stream).await?;
                return Ok(Flow::Continue);
            }
            other => self.execute(other).await?,
        };

        let response = match outcome {
            Ok(mut response) => {
                if let Some(warnings) = self.shared.config.warnings.get(&operation) {
                    response.status = warnings.clone();
                }
                response
            }
            Err(status) => error_response(status),
        };
        write_response(stream, &response).await?;
        Ok(Flow::Continue)
    }

    fn negotiate(&self, protocols: &[OfferedProtocol]) -> Option<AcceptPacket> {
        if self.shared.config.reject_connect {
            return None;
        }
        let max = self.shared.config.max_protocol.number();
        protocols
            .iter()
            .filter(|p| p.version.number() <= max)
            .max_by_key(|p| p.weight)
            .map(|p| AcceptPacket::plain(p.version, p.architecture, p.max_type))
    }

    async fn cancel(&mut self, kind: i32, stream: &mut TcpStream) -> Result<()> {
        tracing::debug!(connection = self.id, kind = kind, "cancel received");
        if kind != cancel_kind::RAISE {
            return Ok(());
        }
        let stalled = self.stalled.take();
        if let Some(operation) = stalled {
            tracing::debug!(connection = self.id, operation = ?operation, "stalled request cancelled");
            write_response(stream, &error_response(StatusVector::error(ISC_CANCELLED))).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, request: Request) -> Result<Outcome> {
        match request {
            Request::CreateBlob { tx_handle, bpb } => self.create_blob(tx_handle, bpb.as_deref()),
            Request::QueEvents { events, local_id, .. } => self.queue_events(&events, local_id).await,
            other => Ok(self.respond(other)),
        }
    }

    fn respond(&mut self, request: Request) -> Outcome {
        match request {
            Request::Attach { dpb, .. } | Request::Create { dpb, .. } => {
                self.check_credentials(&dpb, 1, dpb::USER_NAME, dpb::PASSWORD)?;
                let handle = self.allocate_handle();
                self.db_handle = Some(handle);
                Ok(GenericResponse::ok(handle))
            }
            Request::Detach { db_handle } | Request::DropDatabase { db_handle } => {
                self.check_database(db_handle)?;
                self.db_handle = None;
                self.transactions.clear();
                self.blobs.clear();
                Ok(GenericResponse::ok(0))
            }
            Request::StartTransaction { db_handle, .. } | Request::Reconnect { db_handle, .. } => {
                self.check_database(db_handle)?;
                let handle = self.allocate_handle();
                self.transactions.insert(handle);
                Ok(GenericResponse::ok(handle))
            }
            Request::TransactionControl { operation, tx_handle } => {
                self.check_transaction(tx_handle)?;
                if matches!(operation, Operation::Commit | Operation::Rollback) {
                    self.transactions.remove(&tx_handle);
                }
                Ok(GenericResponse::ok(0))
            }
            Request::Prepare2 { tx_handle, .. } => {
                self.check_transaction(tx_handle)?;
                Ok(GenericResponse::ok(0))
            }
            Request::ExecImmediate {
                tx_handle,
                db_handle,
                statement,
                ..
            } => {
                self.check_database(db_handle)?;
                if tx_handle != 0 {
                    self.check_transaction(tx_handle)?;
                }
                self.shared.state.lock().statements.push(statement);
                Ok(GenericResponse::ok(0))
            }
            Request::Info {
                target,
                handle,
                items,
                ..
            } => self.info(target, handle, &items),
            Request::OpenBlob { tx_handle, blob_id, .. } => self.open_blob(tx_handle, blob_id),
            Request::GetSegment { blob_handle, length } => self.get_segment(blob_handle, length),
            Request::PutSegment { blob_handle, segment } => match self.blobs.get_mut(&blob_handle) {
                Some(OpenBlob::Write { segments, .. }) => {
                    segments.push(segment);
                    Ok(GenericResponse::ok(0))
                }
                Some(OpenBlob::Read(_)) => Err(StatusVector::error(ISC_SEGSTR_NO_WRITE)),
                None => Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
            },
            Request::SeekBlob {
                blob_handle,
                mode,
                offset,
            } => match self.blobs.get_mut(&blob_handle) {
                Some(OpenBlob::Read(cursor)) if cursor.stream => Ok(GenericResponse::ok(cursor.seek(mode, offset))),
                Some(OpenBlob::Read(_)) => Err(StatusVector::error(ISC_BAD_SEGSTR_TYPE)),
                Some(OpenBlob::Write { .. }) => Err(StatusVector::error(ISC_SEGSTR_NO_OP)),
                None => Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
            },
            Request::CloseBlob { blob_handle } => match self.blobs.remove(&blob_handle) {
                Some(OpenBlob::Write {
                    blob_id,
                    stream,
                    segments,
                }) => {
                    let blob = StoredBlob {
                        segments: if stream { vec![Bytes::from(segments.concat())] } else { segments },
                        stream,
                    };
                    self.shared.state.lock().blobs.insert(blob_id, blob);
                    Ok(GenericResponse::ok(0))
                }
                Some(OpenBlob::Read(_)) => Ok(GenericResponse::ok(0)),
                None => Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
            },
            Request::CancelBlob { blob_handle } => match self.blobs.remove(&blob_handle) {
                Some(_) => Ok(GenericResponse::ok(0)),
                None => Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
            },
            Request::CancelEvents { db_handle, local_id } => {
                self.check_database(db_handle)?;
                let connection = self.id;
                self.shared
                    .state
                    .lock()
                    .registrations
                    .retain(|r| !(r.connection == connection && r.local_id == local_id));
                Ok(GenericResponse::ok(0))
            }
            Request::ServiceAttach { spb, .. } => {
                self.check_credentials(&spb, 2, spb::USER_NAME, spb::PASSWORD)?;
                let handle = self.allocate_handle();
                self.service_handle = Some(handle);
                Ok(GenericResponse::ok(handle))
            }
            Request::ServiceInfo { handle, items, .. } => {
                self.check_service(handle)?;
                Ok(GenericResponse {
                    data: self.service_info(&items),
                    ..GenericResponse::default()
                })
            }
            Request::ServiceStart { handle, .. } => {
                self.check_service(handle)?;
                self.shared.state.lock().service_actions += 1;
                Ok(GenericResponse::ok(0))
            }
            Request::ServiceDetach { handle } => {
                self.check_service(handle)?;
                self.service_handle = None;
                Ok(GenericResponse::ok(0))
            }
            other => {
                tracing::debug!(connection = self.id, operation = ?other.operation(), "unsupported request");
                Err(StatusVector::error(ISC_WISH_LIST))
            }
        }
    }

    fn allocate_handle(&self) -> i32 {
        self.shared.state.lock().allocate_handle()
    }

    fn check_database(&self, db_handle: i32) -> std::result::Result<(), StatusVector> {
        if self.db_handle == Some(db_handle) {
            Ok(())
        } else {
            Err(StatusVector::error(ISC_BAD_DB_HANDLE))
        }
    }

    fn check_transaction(&self, tx_handle: i32) -> std::result::Result<(), StatusVector> {
        if self.transactions.contains(&tx_handle) {
            Ok(())
        } else {
            Err(StatusVector::error(ISC_BAD_TRANS_HANDLE))
        }
    }

    fn check_service(&self, handle: i32) -> std::result::Result<(), StatusVector> {
        if self.service_handle == Some(handle) {
            Ok(())
        } else {
            Err(StatusVector::error(ISC_BAD_DB_HANDLE))
        }
    }

    /// Compare the user and password in a parameter buffer with the
    /// configured credentials.
    fn check_credentials(
        &self,
        buffer: &[u8],
        header_len: usize,
        user_tag: u8,
        password_tag: u8,
    ) -> std::result::Result<(), StatusVector> {
        let Some((user, password)) = &self.shared.config.credentials else {
            return Ok(());
        };
        let login_failed = || StatusVector::error(ISC_LOGIN).with(StatusArgument::SqlState("28000".to_string()));
        let body = buffer.get(header_len..).ok_or_else(login_failed)?;
        let items = parse_items(body).map_err(|_| login_failed())?;
        let find = |tag: u8| items.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v);
        if find(user_tag) == Some(user.as_bytes()) && find(password_tag) == Some(password.as_bytes()) {
            Ok(())
        } else {
            tracing::debug!(connection = self.id, "mock login rejected");
            Err(login_failed())
        }
    }

    fn info(&self, target: InfoTarget, handle: i32, items: &[u8]) -> Outcome {
        let mut data = Vec::new();
        match target {
            InfoTarget::Database => {
                self.check_database(handle)?;
                for &item in items {
                    match item {
                        info::database::DB_SQL_DIALECT => info::encode_integer_item(&mut data, item, 3),
                        info::database::PAGE_SIZE => info::encode_integer_item(&mut data, item, 8192),
                        info::database::ODS_VERSION => info::encode_integer_item(&mut data, item, 13),
                        info::database::ODS_MINOR_VERSION => info::encode_integer_item(&mut data, item, 0),
                        _ => {}
                    }
                }
            }
            InfoTarget::Transaction => {
                self.check_transaction(handle)?;
                if items.contains(&info::transaction::ID) {
                    info::encode_integer_item(&mut data, info::transaction::ID, handle);
                }
            }
            InfoTarget::Blob => {
                let (length, segment_count, max_segment, stream) = match self.blobs.get(&handle) {
                    Some(OpenBlob::Read(cursor)) => (
                        cursor.total_length(),
                        cursor.segments.len(),
                        cursor.segments.iter().map(Bytes::len).max().unwrap_or(0),
                        cursor.stream,
                    ),
                    Some(OpenBlob::Write { segments, stream, .. }) => (
                        segments.iter().map(Bytes::len).sum(),
                        segments.len(),
                        segments.iter().map(Bytes::len).max().unwrap_or(0),
                        *stream,
                    ),
                    None => return Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
                };
                for &item in items {
                    let value = match item {
                        info::blob::TOTAL_LENGTH => length,
                        info::blob::NUM_SEGMENTS => segment_count,
                        info::blob::MAX_SEGMENT => max_segment,
                        info::blob::TYPE => usize::from(stream),
                        _ => continue,
                    };
                    info::encode_integer_item(&mut data, item, i32::try_from(value).unwrap_or(i32::MAX));
                }
            }
        }
        data.push(ISC_INFO_END);
        Ok(GenericResponse {
            data: Bytes::from(data),
            ..GenericResponse::default()
        })
    }

    fn service_info(&self, items: &[u8]) -> Bytes {
        let mut data = BytesMut::new();
        for &item in items {
            let value = match item {
                info::service::SERVER_VERSION => self.shared.config.server_version.as_str(),
                info::service::IMPLEMENTATION => "mock",
                _ => continue,
            };
            data.put_u8(item);
            data.put_u16_le(u16::try_from(value.len()).unwrap_or(u16::MAX));
            data.put_slice(value.as_bytes());
        }
        data.put_u8(ISC_INFO_END);
        data.freeze()
    }

    fn create_blob(&mut self, tx_handle: i32, bpb: Option<&[u8]>) -> Result<Outcome> {
        if let Err(status) = self.check_transaction(tx_handle) {
            return Ok(Err(status));
        }
        let blob_type = match bpb {
            Some(bpb) => BlobParameterBuffer::parse(bpb)?.blob_type(),
            None => None,
        };
        let (handle, blob_id) = {
            let mut state = self.shared.state.lock();
            (state.allocate_handle(), state.allocate_blob_id())
        };
        self.blobs.insert(
            handle,
            OpenBlob::Write {
                blob_id,
                stream: blob_type == Some(BlobType::Stream),
                segments: Vec::new(),
            },
        );
        Ok(Ok(GenericResponse {
            object_handle: handle,
            blob_id,
            ..GenericResponse::default()
        }))
    }

    fn open_blob(&mut self, tx_handle: i32, blob_id: BlobId) -> Outcome {
        self.check_transaction(tx_handle)?;
        let cursor = {
            let state = self.shared.state.lock();
            let blob = state
                .blobs
                .get(&blob_id.0)
                .ok_or_else(|| StatusVector::error(ISC_BAD_SEGSTR_ID))?;
            ReadCursor::new(blob)
        };
        let handle = self.allocate_handle();
        self.blobs.insert(handle, OpenBlob::Read(cursor));
        Ok(GenericResponse {
            object_handle: handle,
            blob_id: blob_id.0,
            ..GenericResponse::default()
        })
    }

    fn get_segment(&mut self, blob_handle: i32, length: i32) -> Outcome {
        match self.blobs.get_mut(&blob_handle) {
            Some(OpenBlob::Read(cursor)) => {
                let (status, data) = cursor.fill(usize::try_from(length).unwrap_or(0));
                Ok(GenericResponse {
                    object_handle: status,
                    data,
                    ..GenericResponse::default()
                })
            }
            Some(OpenBlob::Write { .. }) => Err(StatusVector::error(ISC_SEGSTR_NO_READ)),
            None => Err(StatusVector::error(ISC_BAD_SEGSTR_HANDLE)),
        }
    }

    async fn connect_request(&mut self, db_handle: i32, stream: &mut TcpStream) -> Result<()> {
        if let Err(status) = self.check_database(db_handle) {
            return write_response(stream, &error_response(status)).await;
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let mut address = vec![0u8, 2];
        address.extend_from_slice(&port.to_be_bytes());
        address.extend_from_slice(&[127, 0, 0, 1]);
        address.resize(16, 0);

        let aux_handle = self.allocate_handle();
        let response = GenericResponse {
            object_handle: aux_handle,
            data: Bytes::from(address),
            ..GenericResponse::default()
        };
        write_response(stream, &response).await?;

        let (aux, _) = tokio::time::timeout(AUX_ACCEPT_TIMEOUT, listener.accept())
            .await
            .map_err(|_| MockServerError::Protocol("client did not open the event channel".into()))??;
        aux.set_nodelay(true)?;
        let (_read_half, write_half) = aux.into_split();
        let previous = self
            .shared
            .state
            .lock()
            .channels
            .insert(self.id, Arc::new(tokio::sync::Mutex::new(write_half)));
        if previous.is_some() {
            tracing::debug!(connection = self.id, "event channel replaced");
        }
        tracing::debug!(connection = self.id, port = port, "event channel opened");
        Ok(())
    }

    /// Register the events and, like a real server, notify at once when a
    /// queued count is behind the posted count. The notification goes out on
    /// the auxiliary socket before the `op_que_events` response.
    async fn queue_events(&self, events: &[u8], local_id: i32) -> Result<Outcome> {
        let Some(db_handle) = self.db_handle else {
            return Ok(Err(StatusVector::error(ISC_BAD_DB_HANDLE)));
        };
        let requested = parse_event_buffer(events)?;
        let names: Vec<String> = requested
            .iter()
            .map(|e| String::from_utf8_lossy(&e.name).into_owned())
            .collect();

        let (event_id, pending, writer) = {
            let mut state = self.shared.state.lock();
            let event_id = state.allocate_handle();
            let pending: Vec<(&[u8], i32)> = requested
                .iter()
                .zip(&names)
                .filter_map(|(e, name)| {
                    let posted = state.event_counts.get(name).copied().unwrap_or(0);
                    (posted > e.count).then_some((&e.name[..], posted))
                })
                .collect();
            let pending = if pending.is_empty() {
                None
            } else {
                Some(encode_event_buffer(&pending)?)
            };
            let writer = state.channels.get(&self.id).map(Arc::clone);
            state.registrations.push(Registration {
                connection: self.id,
                db_handle,
                local_id,
                names,
            });
            (event_id, pending, writer)
        };

        if let (Some(buffer), Some(writer)) = (pending, writer) {
            send_event_frame(&writer, db_handle, local_id, buffer).await?;
            tracing::trace!(local_id = local_id, "initial event notification sent");
        }
        Ok(Ok(GenericResponse::ok(event_id)))
    }

    /// Drop the connection's event registrations and close its channel.
    async fn teardown(&mut self) {
        let channel = {
            let mut state = self.shared.state.lock();
            let id = self.id;
            state.registrations.retain(|r| r.connection != id);
            state.channels.remove(&id)
        };
        if let Some(writer) = channel {
            let _ = writer.lock().await.shutdown().await;
        }
        tracing::debug!(connection = self.id, "mock connection closed");
    }
}

/// Write one `op_event` frame routed by the client's local id.
async fn send_event_frame(writer: &AuxWriter, db_handle: i32, local_id: i32, buffer: Bytes) -> std::io::Result<()> {
    let mut frame = BytesMut::new();
    EventFrame {
        db_handle,
        buffer,
        ast: 0,
        event_id: local_id,
    }
    .encode(&mut frame);
    writer.lock().await.write_all(&frame).await
}

/// Read the next complete request, or `None` when the client hung up.
async fn read_request(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<Option<Request>> {
    loop {
        if !buf.is_empty() {
            let mut cursor = &buf[..];
            match Request::decode(&mut cursor) {
                Ok(request) => {
                    let consumed = buf.len() - cursor.len();
                    buf.advance(consumed);
                    return Ok(Some(request));
                }
                Err(ProtocolError::Incomplete { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

fn error_response(status: StatusVector) -> GenericResponse {
    GenericResponse {
        status,
        ..GenericResponse::default()
    }
}

async fn write_response(stream: &mut TcpStream, response: &GenericResponse) -> Result<()> {
    let mut out = BytesMut::new();
    response.encode(&mut out);
    stream.write_all(&out).await?;
    Ok(())
}
