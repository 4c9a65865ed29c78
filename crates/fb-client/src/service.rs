//! Service manager sessions.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use fb_wire::{Diagnostic, GenericResponse, ProtocolDescriptor, Request};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::DatabaseState;
use crate::warning::{WarningCallback, WarningDispatcher};
use crate::wire::WireConnection;

/// A session with the server's service manager.
///
/// Follows the same lifecycle as a [`Database`](crate::Database):
/// `connect`, `attach`, requests, `close`.
pub struct Service {
    config: Config,
    wire: tokio::sync::Mutex<Option<WireConnection>>,
    protocol: &'static ProtocolDescriptor,
    state: Mutex<DatabaseState>,
    handle: AtomicI32,
    warnings: Arc<WarningDispatcher>,
}

impl Service {
    /// Connect to the server for the configured service name.
    pub async fn connect(config: Config) -> Result<Self> {
        let wire = WireConnection::connect(&config, &config.service_name).await?;
        let protocol = wire.protocol();
        Ok(Self {
            config,
            wire: tokio::sync::Mutex::new(Some(wire)),
            protocol,
            state: Mutex::new(DatabaseState::Connected),
            handle: AtomicI32::new(0),
            warnings: Arc::new(WarningDispatcher::default()),
        })
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> DatabaseState {
        *self.state.lock()
    }

    /// Server service handle, 0 before attach.
    #[must_use]
    pub fn handle(&self) -> i32 {
        self.handle.load(Ordering::Acquire)
    }

    /// Negotiated protocol.
    #[must_use]
    pub fn protocol(&self) -> &'static ProtocolDescriptor {
        self.protocol
    }

    /// Route warnings to `callback`.
    pub fn set_warning_callback(&self, callback: impl WarningCallback + 'static) {
        self.warnings.set(Some(Arc::new(callback)));
    }

    /// Attach to the service manager.
    pub async fn attach(&self) -> Result<()> {
        match self.state() {
            DatabaseState::Connected => {}
            DatabaseState::Attached => return Err(Error::AlreadyAttached),
            DatabaseState::Unconnected | DatabaseState::Closed => return Err(Error::NotConnected),
        }
        let spb = self.config.service_parameter_buffer()?;
        let response = self
            .exchange(vec![Request::ServiceAttach {
                service: self.config.service_name.clone(),
                spb,
            }])
            .await?;
        self.handle.store(response.object_handle, Ordering::Release);
        *self.state.lock() = DatabaseState::Attached;
        tracing::debug!(handle = response.object_handle, service = %self.config.service_name, "service attached");
        Ok(())
    }

    /// Query the service manager; returns the raw info buffer.
    pub async fn service_info(&self, spb: Bytes, items: Bytes, max_length: i32) -> Result<Bytes> {
        self.check_attached()?;
        let response = self
            .exchange(vec![Request::ServiceInfo {
                handle: self.handle(),
                spb,
                items,
                max_length,
            }])
            .await?;
        Ok(response.data)
    }

    /// Start a service action described by `spb`.
    pub async fn start_service_action(&self, spb: Bytes) -> Result<()> {
        self.check_attached()?;
        self.exchange(vec![Request::ServiceStart {
            handle: self.handle(),
            spb,
        }])
        .await?;
        Ok(())
    }

    /// Detach from the service manager and close the connection.
    pub async fn close(&self) -> Result<()> {
        self.check_attached()?;
        let mut guard = self.wire.lock().await;
        let Some(mut wire) = guard.take() else {
            return Err(Error::ConnectionClosed);
        };
        let warnings = Arc::clone(&self.warnings);
        let on_warning = move |warning: &Diagnostic| warnings.dispatch(warning);
        let result = match wire
            .send(vec![
                Request::ServiceDetach { handle: self.handle() },
                Request::Disconnect,
            ])
            .await
        {
            Ok(()) => wire
                .read_response_within(Some(self.config.timeouts.detach_timeout), &on_warning)
                .await
                .map(drop),
            Err(e) => Err(e),
        };
        wire.close().await;
        *self.state.lock() = DatabaseState::Closed;
        tracing::debug!("service detached");
        result
    }

    fn check_attached(&self) -> Result<()> {
        if self.state().is_attached() {
            Ok(())
        } else {
            Err(Error::NotAttached)
        }
    }

    async fn exchange(&self, requests: Vec<Request>) -> Result<GenericResponse> {
        let mut guard = self.wire.lock().await;
        let Some(wire) = guard.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        let warnings = Arc::clone(&self.warnings);
        let on_warning = move |warning: &Diagnostic| warnings.dispatch(warning);
        let result = wire.exchange(requests, &on_warning).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(error = %e, "service connection lost");
                guard.take();
                *self.state.lock() = DatabaseState::Closed;
            }
        }
        result
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service", &self.config.service_name)
            .field("state", &self.state())
            .field("handle", &self.handle())
            .field("protocol", &self.protocol.version)
            .finish()
    }
}
