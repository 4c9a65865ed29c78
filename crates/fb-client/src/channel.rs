//! Auxiliary connection carrying event notifications.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use fb_wire::EventFrame;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;

use crate::database::DatabaseShared;
use crate::listener::{DatabaseListener, ListenerRegistry};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Receives frames read from an [`AsynchronousChannel`].
///
/// Callbacks run on the processor task and must not block.
pub trait ChannelListener: Send + Sync {
    /// An event frame arrived.
    fn event_received(&self, _channel: &AsynchronousChannel, _event: &EventFrame) {}

    /// The channel is closing.
    fn channel_closing(&self, _channel: &AsynchronousChannel) {}
}

/// The auxiliary event connection of one session.
///
/// Reading is done by the [`AsynchronousProcessor`](crate::AsynchronousProcessor)
/// task the channel is registered with.
pub struct AsynchronousChannel {
    id: u64,
    aux_handle: i32,
    closed: AtomicBool,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown: Notify,
    listeners: ListenerRegistry<dyn ChannelListener>,
    database: Weak<DatabaseShared>,
}

impl AsynchronousChannel {
    pub(crate) fn new(aux_handle: i32, writer: Option<OwnedWriteHalf>, database: Weak<DatabaseShared>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            aux_handle,
            closed: AtomicBool::new(false),
            writer: Mutex::new(writer),
            shutdown: Notify::new(),
            listeners: ListenerRegistry::new(),
            database,
        })
    }

    /// Process-unique channel id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server handle of the auxiliary connection.
    #[must_use]
    pub fn aux_handle(&self) -> i32 {
        self.aux_handle
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a listener; dead and duplicate entries are ignored.
    pub fn add_channel_listener(&self, listener: Weak<dyn ChannelListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener.
    pub fn remove_channel_listener(&self, listener: &Weak<dyn ChannelListener>) {
        self.listeners.remove(listener);
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn dispatch(&self, frame: &EventFrame) {
        for listener in self.listeners.snapshot() {
            listener.event_received(self, frame);
        }
    }

    pub(crate) async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.shutdown.notified().await;
    }

    /// Close the channel. Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(channel = self.id, "closing event channel");

        for listener in self.listeners.snapshot() {
            listener.channel_closing(self);
        }
        self.listeners.clear();
        // Permit is stored, so a reader not yet waiting still wakes.
        self.shutdown.notify_one();

        let writer = self.writer.lock().take();
        drop(writer);

        if let Some(db) = self.database.upgrade() {
            db.clear_channel(self.id);
        }
    }
}

impl DatabaseListener for AsynchronousChannel {
    fn detached(&self) {
        self.close();
    }
}

impl std::fmt::Debug for AsynchronousChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsynchronousChannel")
            .field("id", &self.id)
            .field("aux_handle", &self.aux_handle)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        events: AtomicUsize,
        closing: AtomicUsize,
    }

    impl ChannelListener for Recorder {
        fn event_received(&self, _channel: &AsynchronousChannel, _event: &EventFrame) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn channel_closing(&self, _channel: &AsynchronousChannel) {
            self.closing.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame() -> EventFrame {
        EventFrame {
            db_handle: 0,
            buffer: Bytes::new(),
            ast: 0,
            event_id: 1,
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a = AsynchronousChannel::new(1, None, Weak::new());
        let b = AsynchronousChannel::new(1, None, Weak::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_dispatch_reaches_listeners() {
        let channel = AsynchronousChannel::new(3, None, Weak::new());
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder) as Weak<dyn ChannelListener>;
        channel.add_channel_listener(weak.clone());
        channel.add_channel_listener(weak.clone());

        channel.dispatch(&frame());
        assert_eq!(recorder.events.load(Ordering::SeqCst), 1);

        channel.remove_channel_listener(&weak);
        channel.dispatch(&frame());
        assert_eq!(recorder.events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_runs_once() {
        let channel = AsynchronousChannel::new(3, None, Weak::new());
        let recorder = Arc::new(Recorder::default());
        channel.add_channel_listener(Arc::downgrade(&recorder) as Weak<dyn ChannelListener>);

        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert_eq!(recorder.closing.load(Ordering::SeqCst), 1);
        assert_eq!(channel.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_wakes_after_close() {
        let channel = AsynchronousChannel::new(3, None, Weak::new());
        let waiter = Arc::clone(&channel);
        let task = tokio::spawn(async move { waiter.closed().await });
        channel.close();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        // Already closed: returns at once.
        channel.closed().await;
    }
}
