//! Database event notifications.
//!
//! An [`EventHandle`] names one event and carries the handler to call when
//! it is posted. Queueing a handle registers it with the session's
//! [`AsynchronousChannel`], created on first use.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use fb_codec::EventReader;
use fb_wire::event::encode_event_buffer;
use fb_wire::{EventFrame, ProtocolError, Request};
use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::channel::{AsynchronousChannel, ChannelListener};
use crate::database::DatabaseShared;
use crate::error::{Error, Result};
use crate::listener::DatabaseListener;
use crate::processor::AsynchronousProcessor;

/// One delivery of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNotification {
    /// Event name.
    pub name: String,
    /// Server event id of the registration, 0 when the notification
    /// arrived before the server acknowledged the queue request.
    pub event_id: i32,
    /// Number of times the event has been posted, as reported by the server.
    pub event_count: i32,
}

/// Called on the event channel's task when an event is delivered.
///
/// Implemented for any `Fn(&EventNotification) + Send + Sync` closure.
pub trait EventHandler: Send + Sync {
    /// Handle one delivery.
    fn event_occurred(&self, event: &EventNotification);
}

impl<F> EventHandler for F
where
    F: Fn(&EventNotification) + Send + Sync,
{
    fn event_occurred(&self, event: &EventNotification) {
        self(event);
    }
}

#[derive(Debug, Default)]
struct Counters {
    internal: i32,
    previous: i32,
    event_id: i32,
    local_id: i32,
}

pub(crate) struct EventHandleShared {
    name: String,
    encoded_name: Bytes,
    handler: Arc<dyn EventHandler>,
    counters: Mutex<Counters>,
}

impl ChannelListener for EventHandleShared {
    fn event_received(&self, _channel: &AsynchronousChannel, frame: &EventFrame) {
        // Frames carry the local id sent with op_que_events. The server may
        // notify before it answers that request.
        let local_id = self.counters.lock().local_id;
        if local_id == 0 || frame.event_id != local_id {
            return;
        }
        let counts = match frame.counts() {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(event_id = frame.event_id, error = %e, "malformed event buffer");
                return;
            }
        };
        let Some(entry) = counts.iter().find(|c| c.name == self.encoded_name) else {
            return;
        };

        let (event_id, event_count) = {
            let mut counters = self.counters.lock();
            counters.internal = counters.internal.max(entry.count);
            (counters.event_id, counters.internal)
        };
        tracing::trace!(name = %self.name, local_id = local_id, count = event_count, "event delivered");
        self.handler.event_occurred(&EventNotification {
            name: self.name.clone(),
            event_id,
            event_count,
        });
    }
}

/// A registration for one named event.
#[derive(Clone)]
pub struct EventHandle {
    inner: Arc<EventHandleShared>,
}

impl EventHandle {
    pub(crate) fn new(name: &str, charset: &str, handler: Arc<dyn EventHandler>) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("event name must not be empty".into()));
        }
        let encoded_name = encode_name(charset, name);
        if encoded_name.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidArgument(format!(
                "event name of {} bytes exceeds 255",
                encoded_name.len()
            )));
        }
        Ok(Self {
            inner: Arc::new(EventHandleShared {
                name: name.to_string(),
                encoded_name,
                handler,
                counters: Mutex::new(Counters::default()),
            }),
        })
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Server event id of the current registration, 0 when not queued.
    #[must_use]
    pub fn event_id(&self) -> i32 {
        self.inner.counters.lock().event_id
    }

    /// Client-local id of the current registration.
    #[must_use]
    pub fn local_id(&self) -> i32 {
        self.inner.counters.lock().local_id
    }

    /// Last count reported by the server.
    #[must_use]
    pub fn event_count(&self) -> i32 {
        self.inner.counters.lock().internal
    }

    /// Count since the previous call, which becomes the new baseline.
    pub(crate) fn count_delta(&self) -> i32 {
        let mut counters = self.inner.counters.lock();
        let delta = counters.internal - counters.previous;
        counters.previous = counters.internal;
        delta
    }

    fn event_buffer(&self) -> std::result::Result<Bytes, ProtocolError> {
        let count = self.inner.counters.lock().internal;
        encode_event_buffer(&[(&self.inner.encoded_name, count)])
    }

    fn listener(&self) -> Weak<dyn ChannelListener> {
        Arc::downgrade(&self.inner) as Weak<dyn ChannelListener>
    }
}

impl std::fmt::Debug for EventHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counters = self.inner.counters.lock();
        f.debug_struct("EventHandle")
            .field("name", &self.inner.name)
            .field("event_id", &counters.event_id)
            .field("local_id", &counters.local_id)
            .field("count", &counters.internal)
            .finish()
    }
}

#[cfg(feature = "encoding")]
fn encode_name(charset: &str, name: &str) -> Bytes {
    Bytes::from(fb_wire::charset::encode(charset, name))
}

#[cfg(not(feature = "encoding"))]
fn encode_name(_charset: &str, name: &str) -> Bytes {
    Bytes::copy_from_slice(name.as_bytes())
}

/// The session's event channel, set up on first use.
async fn event_channel(db: &Arc<DatabaseShared>) -> Result<Arc<AsynchronousChannel>> {
    let existing = db.channel.lock().clone();
    if let Some(channel) = existing.filter(|c| !c.is_closed()) {
        return Ok(channel);
    }

    let response = db
        .round_trip(Request::ConnectRequest {
            db_handle: db.db_handle(),
        })
        .await?;
    let data = &response.data;
    if data.len() < 4 {
        return Err(ProtocolError::InvalidBuffer("connect request response carries no address").into());
    }
    let port = u16::from_be_bytes([data[2], data[3]]);
    let addr = format!("{}:{}", db.config.host, port);

    let stream = tokio::time::timeout(db.config.timeouts.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::ConnectTimeout)?
        .map_err(|e| Error::Connection(format!("event channel {addr}: {e}")))?;
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();

    let channel = AsynchronousChannel::new(response.object_handle, Some(write_half), Arc::downgrade(db));
    db.add_listener(Arc::downgrade(&channel) as Weak<dyn DatabaseListener>);
    AsynchronousProcessor::global().register(Arc::clone(&channel), EventReader::new(read_half));
    *db.channel.lock() = Some(Arc::clone(&channel));

    tracing::debug!(addr = %addr, aux_handle = channel.aux_handle(), "event channel established");
    Ok(channel)
}

pub(crate) async fn queue_event(db: &Arc<DatabaseShared>, handle: &EventHandle) -> Result<()> {
    db.check_attached()?;
    let events = handle.event_buffer()?;
    let channel = event_channel(db).await?;

    let local_id = db.next_event_local_id();
    handle.inner.counters.lock().local_id = local_id;
    channel.add_channel_listener(handle.listener());

    let response = db
        .round_trip(Request::QueEvents {
            aux_handle: channel.aux_handle(),
            events,
            local_id,
        })
        .await;
    match response {
        Ok(response) => {
            handle.inner.counters.lock().event_id = response.object_handle;
            tracing::debug!(name = %handle.name(), event_id = response.object_handle, local_id = local_id, "event queued");
            Ok(())
        }
        Err(e) => {
            channel.remove_channel_listener(&handle.listener());
            Err(e)
        }
    }
}

pub(crate) async fn cancel_event(db: &Arc<DatabaseShared>, handle: &EventHandle) -> Result<()> {
    db.check_attached()?;
    let channel = db.channel.lock().clone();
    if let Some(channel) = channel {
        channel.remove_channel_listener(&handle.listener());
    }

    let local_id = handle.local_id();
    db.round_trip(Request::CancelEvents {
        db_handle: db.db_handle(),
        local_id,
    })
    .await?;
    tracing::debug!(name = %handle.name(), local_id = local_id, "event cancelled");
    Ok(())
}
