//! Main connection: protocol negotiation and the generic response dispatcher.

use std::time::Duration;

use fb_codec::{AbortHandle, Connection};
use fb_wire::request::user_identification;
use fb_wire::version::{descriptor_for, offered_protocols};
use fb_wire::{
    Diagnostic, GenericResponse, OfferedProtocol, Operation, ProtocolDescriptor, ProtocolError, Request,
    ServerMessage, StatusOutcome,
};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{Error, Result, ServerError};

/// Sink for warnings found while dispatching a response.
pub(crate) type WarningSink<'a> = &'a (dyn Fn(&Diagnostic) + Send + Sync);

/// A negotiated connection to the server.
pub(crate) struct WireConnection {
    conn: Connection<TcpStream>,
    protocol: &'static ProtocolDescriptor,
    read_timeout: Option<Duration>,
}

impl WireConnection {
    /// Open a TCP connection and negotiate the protocol.
    pub(crate) async fn connect(config: &Config, database: &str) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        tracing::debug!(addr = %addr, "connecting");

        let stream = tokio::time::timeout(config.timeouts.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(|e| Error::Connection(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let mut conn = Connection::new(stream);
        let protocols: Vec<OfferedProtocol> = offered_protocols(config.max_protocol).map(OfferedProtocol::from).collect();
        conn.send(Request::Connect {
            database: database.to_string(),
            user_id: user_identification(&config.user, &config.client_host),
            protocols,
        })
        .await?;

        let reply = match config.timeouts.read_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.read_message())
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => conn.read_message().await?,
        };
        let protocol = negotiate(reply)?;
        tracing::debug!(version = %protocol.version, "protocol negotiated");

        Ok(Self {
            conn,
            protocol,
            read_timeout: config.timeouts.read_timeout,
        })
    }

    /// The negotiated protocol.
    pub(crate) fn protocol(&self) -> &'static ProtocolDescriptor {
        self.protocol
    }

    /// Handle for aborting or sending `op_cancel` from another task.
    pub(crate) fn abort_handle(&self) -> AbortHandle<TcpStream> {
        self.conn.abort_handle()
    }

    /// Send requests and read one generic response.
    pub(crate) async fn exchange(
        &mut self,
        requests: Vec<Request>,
        on_warning: WarningSink<'_>,
    ) -> Result<GenericResponse> {
        self.send(requests).await?;
        self.read_response(on_warning).await
    }

    /// Send requests without reading.
    pub(crate) async fn send(&mut self, requests: Vec<Request>) -> Result<()> {
        self.conn.send_all(requests).await.map_err(Error::from)
    }

    /// Read one generic response and route its status vector.
    pub(crate) async fn read_response(&mut self, on_warning: WarningSink<'_>) -> Result<GenericResponse> {
        self.read_response_within(self.read_timeout, on_warning).await
    }

    /// Read one generic response with an explicit timeout.
    pub(crate) async fn read_response_within(
        &mut self,
        limit: Option<Duration>,
        on_warning: WarningSink<'_>,
    ) -> Result<GenericResponse> {
        let message = match limit {
            Some(limit) => tokio::time::timeout(limit, self.conn.read_message())
                .await
                .map_err(|_| Error::ReadTimeout)??,
            None => self.conn.read_message().await?,
        };
        match message {
            ServerMessage::Response(response) => process_response(response, on_warning),
            ServerMessage::Disconnect => Err(Error::ConnectionClosed),
            ServerMessage::Accept(accept) => Err(ProtocolError::UnexpectedOperation(accept.operation.code()).into()),
            ServerMessage::Reject => Err(ProtocolError::UnexpectedOperation(Operation::Reject.code()).into()),
        }
    }

    /// Shut the socket down, ignoring failures.
    pub(crate) async fn close(mut self) {
        if let Err(e) = self.conn.shutdown().await {
            tracing::debug!(error = %e, "socket shutdown failed");
        }
    }
}

impl std::fmt::Debug for WireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection")
            .field("protocol", &self.protocol.version)
            .field("aborted", &self.conn.is_aborted())
            .finish_non_exhaustive()
    }
}

/// Interpret the reply to `op_connect`.
fn negotiate(reply: ServerMessage) -> Result<&'static ProtocolDescriptor> {
    match reply {
        ServerMessage::Accept(accept) => {
            if accept.operation != Operation::Accept && !accept.authenticated {
                return Err(Error::FeatureNotSupported(format!(
                    "authentication plugin negotiation (plugin {:?})",
                    accept.plugin
                )));
            }
            Ok(descriptor_for(accept.version)?)
        }
        ServerMessage::Reject => Err(Error::Connection("server rejected all offered protocols".into())),
        ServerMessage::Response(response) => match response.status.classify() {
            StatusOutcome::Error(diagnostic) => Err(ServerError::from(diagnostic).into()),
            _ => Err(ProtocolError::UnexpectedOperation(Operation::Response.code()).into()),
        },
        ServerMessage::Disconnect => Err(Error::ConnectionClosed),
    }
}

/// Classify a generic response: errors are returned, warnings are routed
/// to `on_warning`, the response is returned otherwise.
pub(crate) fn process_response(response: GenericResponse, on_warning: WarningSink<'_>) -> Result<GenericResponse> {
    match response.status.classify() {
        StatusOutcome::Success => Ok(response),
        StatusOutcome::Warning(warning) => {
            tracing::debug!(code = warning.code, "response carried a warning");
            on_warning(&warning);
            Ok(response)
        }
        StatusOutcome::Error(diagnostic) => {
            tracing::debug!(code = diagnostic.code, sql_state = ?diagnostic.sql_state, "server error");
            Err(ServerError::from(diagnostic).into())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use fb_wire::codes::{ISC_LOGIN, ISC_OPEN_TRANS};
    use fb_wire::version::{ARCH_GENERIC, PTYPE_LAZY_SEND};
    use fb_wire::{AcceptPacket, ProtocolVersion, StatusArgument, StatusVector};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn response(status: StatusVector) -> GenericResponse {
        GenericResponse {
            status,
            ..GenericResponse::ok(4)
        }
    }

    #[test]
    fn test_process_success() {
        let ignore = |_: &Diagnostic| {};
        let r = process_response(GenericResponse::ok(8), &ignore).unwrap();
        assert_eq!(r.object_handle, 8);
    }

    #[test]
    fn test_process_warning_routed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_warning = move |w: &Diagnostic| sink.lock().push(w.code);

        let r = process_response(response(StatusVector::warning(ISC_OPEN_TRANS)), &on_warning).unwrap();
        assert_eq!(r.object_handle, 4);
        assert_eq!(*seen.lock(), vec![ISC_OPEN_TRANS]);
    }

    #[test]
    fn test_process_error_verbatim() {
        let ignore = |_: &Diagnostic| {};
        let status = StatusVector::error(ISC_LOGIN).with(StatusArgument::SqlState("28000".into()));
        let err = process_response(response(status), &ignore).unwrap_err();
        let Error::Server(server) = err else {
            unreachable!("expected server error");
        };
        assert_eq!(server.code(), ISC_LOGIN);
        assert_eq!(server.sql_state(), Some("28000"));
    }

    #[test]
    fn test_negotiate_variants() {
        let accepted = negotiate(ServerMessage::Accept(AcceptPacket::plain(
            ProtocolVersion::V12,
            ARCH_GENERIC,
            PTYPE_LAZY_SEND,
        )))
        .unwrap();
        assert_eq!(accepted.version, ProtocolVersion::V12);

        let mut cond = AcceptPacket::plain(ProtocolVersion::V13, ARCH_GENERIC, PTYPE_LAZY_SEND);
        cond.operation = Operation::CondAccept;
        cond.authenticated = false;
        assert!(matches!(
            negotiate(ServerMessage::Accept(cond.clone())),
            Err(Error::FeatureNotSupported(_))
        ));
        cond.authenticated = true;
        assert!(negotiate(ServerMessage::Accept(cond)).is_ok());

        assert!(matches!(negotiate(ServerMessage::Reject), Err(Error::Connection(_))));
        assert!(matches!(
            negotiate(ServerMessage::Response(response(StatusVector::error(ISC_LOGIN)))),
            Err(Error::Server(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_negotiates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut scratch = [0u8; 512];
            let _ = socket.read(&mut scratch).await.unwrap();
            let mut reply = BytesMut::new();
            AcceptPacket::plain(ProtocolVersion::V10, ARCH_GENERIC, PTYPE_LAZY_SEND).encode(&mut reply);
            socket.write_all(&reply).await.unwrap();
            socket
        });

        let config = Config::new().host("127.0.0.1").port(port);
        let wire = WireConnection::connect(&config, "employee").await.unwrap();
        assert_eq!(wire.protocol().version, ProtocolVersion::V10);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = Config::new().host("127.0.0.1").port(port);
        let err = WireConnection::connect(&config, "employee").await.unwrap_err();
        assert!(err.is_transport_error());
    }
}
