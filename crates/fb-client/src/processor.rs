//! Background reading of event channels.
//!
//! One tokio task per registered [`AsynchronousChannel`] reads frames and
//! dispatches them to the channel's listeners. A task ends when the channel
//! is closed locally, the server closes it, or the socket fails; in every
//! case the channel ends up closed and deregistered.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use fb_codec::EventReader;
use fb_wire::ChannelMessage;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::channel::AsynchronousChannel;

static GLOBAL: Lazy<AsynchronousProcessor> = Lazy::new(AsynchronousProcessor::new);

struct ChannelTask {
    channel: Weak<AsynchronousChannel>,
    handle: JoinHandle<()>,
}

type TaskMap = Arc<Mutex<HashMap<u64, ChannelTask>>>;

/// Owned by a reader task. Closes and deregisters the channel however the
/// task ends, including when the runtime drops it.
struct TaskGuard {
    channel: Arc<AsynchronousChannel>,
    tasks: TaskMap,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let id = self.channel.id();
        self.channel.close();
        self.tasks.lock().remove(&id);
        tracing::debug!(channel = id, "event channel task finished");
    }
}

/// Owner of the reader tasks of event channels.
pub struct AsynchronousProcessor {
    tasks: TaskMap,
}

impl AsynchronousProcessor {
    /// An empty processor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The process-wide processor used by sessions.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Start reading `reader` on behalf of `channel`.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn register<R>(&self, channel: Arc<AsynchronousChannel>, reader: EventReader<R>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let id = channel.id();
        let weak = Arc::downgrade(&channel);
        let guard = TaskGuard {
            channel: Arc::clone(&channel),
            tasks: Arc::clone(&self.tasks),
        };

        // Spawn without holding the lock: a shut down runtime drops the
        // future, and with it the guard, inside `spawn`.
        let handle = tokio::spawn(async move {
            let guard = guard;
            run_channel(&guard.channel, reader).await;
        });

        let mut tasks = self.tasks.lock();
        tasks.insert(id, ChannelTask { channel: weak, handle });
        // The guard closes before it deregisters, so a task that already
        // ended leaves a closed channel behind.
        if channel.is_closed() {
            tasks.remove(&id);
        }
    }

    /// Number of channels with a running reader task.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Close every registered channel; their tasks end shortly after.
    pub fn shutdown(&self) {
        let channels: Vec<Arc<AsynchronousChannel>> = self
            .tasks
            .lock()
            .values()
            .filter_map(|task| task.channel.upgrade())
            .collect();
        for channel in channels {
            channel.close();
        }
    }

    /// Abort all reader tasks without closing their channels gracefully.
    pub fn abort_all(&self) {
        let drained: Vec<ChannelTask> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        for task in drained {
            task.handle.abort();
            if let Some(channel) = task.channel.upgrade() {
                channel.close();
            }
        }
    }
}

impl Default for AsynchronousProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsynchronousProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsynchronousProcessor")
            .field("channels", &self.channel_count())
            .finish()
    }
}

async fn run_channel<R>(channel: &AsynchronousChannel, mut reader: EventReader<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            () = channel.closed() => return,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(ChannelMessage::Event(frame))) => {
                tracing::trace!(channel = channel.id(), event_id = frame.event_id, "event frame");
                channel.dispatch(&frame);
            }
            Some(Ok(ChannelMessage::Closed)) => {
                tracing::debug!(channel = channel.id(), "server closed event channel");
                return;
            }
            Some(Ok(ChannelMessage::Unknown(op))) => {
                tracing::error!(channel = channel.id(), operation = op, "unexpected operation on event channel");
            }
            Some(Err(e)) => {
                if !channel.is_closed() {
                    tracing::warn!(channel = channel.id(), error = %e, "event channel read failed");
                }
                return;
            }
            None => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::ChannelListener;
    use bytes::BytesMut;
    use fb_wire::event::encode_event_buffer;
    use fb_wire::{EventFrame, Operation};
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorder {
        counts: PlMutex<Vec<i32>>,
        closing: AtomicUsize,
    }

    impl ChannelListener for Recorder {
        fn event_received(&self, _channel: &AsynchronousChannel, event: &EventFrame) {
            let counts = event.counts().unwrap();
            self.counts.lock().push(counts[0].count);
        }

        fn channel_closing(&self, _channel: &AsynchronousChannel) {
            self.closing.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event_bytes(count: i32) -> BytesMut {
        let mut buf = BytesMut::new();
        EventFrame {
            db_handle: 1,
            buffer: encode_event_buffer(&[(b"E", count)]).unwrap(),
            ast: 0,
            event_id: 9,
        }
        .encode(&mut buf);
        buf
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_frames_dispatched_in_order() {
        let processor = AsynchronousProcessor::new();
        let (client, mut server) = tokio::io::duplex(64);
        let channel = AsynchronousChannel::new(1, None, Weak::new());
        let recorder = Arc::new(Recorder::default());
        channel.add_channel_listener(Arc::downgrade(&recorder) as Weak<dyn ChannelListener>);
        processor.register(Arc::clone(&channel), EventReader::new(client));
        assert_eq!(processor.channel_count(), 1);

        for count in 1..=20 {
            server.write_all(&event_bytes(count)).await.unwrap();
        }
        wait_for(|| recorder.counts.lock().len() == 20).await;
        assert_eq!(*recorder.counts.lock(), (1..=20).collect::<Vec<_>>());

        server.write_all(&Operation::Exit.code().to_be_bytes()).await.unwrap();
        wait_for(|| processor.channel_count() == 0).await;
        assert!(channel.is_closed());
        assert_eq!(recorder.closing.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_close_stops_task() {
        let processor = AsynchronousProcessor::new();
        let (client, _server) = tokio::io::duplex(64);
        let channel = AsynchronousChannel::new(1, None, Weak::new());
        processor.register(Arc::clone(&channel), EventReader::new(client));

        processor.shutdown();
        wait_for(|| processor.channel_count() == 0).await;
        assert!(channel.is_closed());
    }

    #[test]
    fn test_runtime_drop_closes_channel() {
        let processor = AsynchronousProcessor::new();
        let (client, _server) = tokio::io::duplex(64);
        let channel = AsynchronousChannel::new(1, None, Weak::new());
        let recorder = Arc::new(Recorder::default());
        channel.add_channel_listener(Arc::downgrade(&recorder) as Weak<dyn ChannelListener>);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        {
            let _enter = runtime.enter();
            processor.register(Arc::clone(&channel), EventReader::new(client));
        }
        assert_eq!(processor.channel_count(), 1);
        assert!(!channel.is_closed());

        // The task never ran; dropping the runtime drops its future.
        drop(runtime);
        assert!(channel.is_closed());
        assert_eq!(processor.channel_count(), 0);
        assert_eq!(recorder.closing.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_on_stopped_runtime_cleans_up() {
        let processor = AsynchronousProcessor::new();
        let (client, _server) = tokio::io::duplex(64);
        let channel = AsynchronousChannel::new(1, None, Weak::new());

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let handle = runtime.handle().clone();
        drop(runtime);
        {
            let _enter = handle.enter();
            processor.register(Arc::clone(&channel), EventReader::new(client));
        }
        assert!(channel.is_closed());
        assert_eq!(processor.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_drop_closes_channel() {
        let processor = AsynchronousProcessor::new();
        let (client, server) = tokio::io::duplex(64);
        let channel = AsynchronousChannel::new(1, None, Weak::new());
        processor.register(Arc::clone(&channel), EventReader::new(client));

        drop(server);
        wait_for(|| processor.channel_count() == 0).await;
        assert!(channel.is_closed());
    }
}
