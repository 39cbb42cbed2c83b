//! The UI-side half of the channel: connect with retry, read events in a
//! background task, and reconnect on EOF without external prompting. Modeled
//! as the spec's own outer loop, `while not disposed { connect(); read_until_eof(); }`,
//! to avoid unbounded stack growth under a flapping server.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{Decoder, Encoder};
use crate::event::Event;
use crate::platform::{self, ClientStream};
use crate::SocketId;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Fired once per successful connection and once per received event.
pub trait ClientCallbacks: Send + Sync + 'static {
    fn connected(&self) {}
    fn event_received(&self, event: Event);
    fn decode_error(&self, _error: &str) {}
}

type Write = FramedWrite<WriteHalf<ClientStream>, Encoder>;

/// A running client. `send` pushes onto the current connection; nothing is
/// queued across reconnects, so a send while disconnected fails outright.
pub struct Client {
    write: Arc<Mutex<Option<Write>>>,
    disposed: Arc<tokio::sync::Notify>,
    reader_task: tokio::task::JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected to the IPC server")]
    Disconnected,
    #[error("failed to write IPC frame: {0}")]
    Io(#[from] crate::codec::IpcCodecError),
}

impl Client {
    /// Starts the connect-and-reconnect loop as a background task and
    /// returns immediately; `callbacks.connected()` fires after the first
    /// successful dial.
    pub fn spawn(id: SocketId, callbacks: Arc<dyn ClientCallbacks>) -> Self {
        let write = Arc::new(Mutex::new(None));
        let disposed = Arc::new(tokio::sync::Notify::new());

        let reader_task = tokio::spawn(connect_loop(id, callbacks, write.clone(), disposed.clone()));

        Self {
            write,
            disposed,
            reader_task,
        }
    }

    pub async fn send(&self, event: &Event) -> Result<(), SendError> {
        use tokio_util::codec::Encoder as _;
        let mut guard = self.write.lock().await;
        let Some(write) = guard.as_mut() else {
            return Err(SendError::Disconnected);
        };
        use futures::SinkExt as _;
        write.send(event).await.map_err(SendError::Io)
    }

    /// Drains nothing (writes are immediate, not buffered) and closes the
    /// handle; the background task observes `disposed` and exits.
    pub async fn dispose(self) {
        self.disposed.notify_waiters();
        *self.write.lock().await = None;
        self.reader_task.abort();
        let _ = self.reader_task.await;
    }
}

async fn connect_loop(
    id: SocketId,
    callbacks: Arc<dyn ClientCallbacks>,
    write: Arc<Mutex<Option<Write>>>,
    disposed: Arc<tokio::sync::Notify>,
) {
    loop {
        tokio::select! {
            biased;
            _ = disposed.notified() => return,
            stream = dial(id) => {
                let (rx, tx) = tokio::io::split(stream);
                let mut read = FramedRead::new(rx, Decoder::default());
                *write.lock().await = Some(FramedWrite::new(tx, Encoder::default()));
                callbacks.connected();

                use futures::StreamExt as _;
                loop {
                    tokio::select! {
                        biased;
                        _ = disposed.notified() => return,
                        frame = read.next() => {
                            match frame {
                                Some(Ok(event)) => callbacks.event_received(event),
                                Some(Err(error)) => callbacks.decode_error(&error.to_string()),
                                None => break, // stream EOF: fall through to reconnect
                            }
                        }
                    }
                }
                *write.lock().await = None;
            }
        }
    }
}

async fn dial(id: SocketId) -> ClientStream {
    loop {
        match tokio::time::timeout(DIAL_TIMEOUT, platform::connect_to_socket(id)).await {
            Ok(Ok(stream)) => return stream,
            Ok(Err(error)) => tracing::debug!(%error, "IPC connect failed"),
            Err(_) => tracing::debug!("IPC connect timed out"),
        }
        tokio::time::sleep(RETRY_BACKOFF).await;
    }
}

pub struct ChannelCallbacks {
    events: mpsc::UnboundedSender<Event>,
}

impl ChannelCallbacks {
    /// Convenience implementation of [`ClientCallbacks`] that forwards every
    /// received event onto an mpsc channel, for tests and simple consumers
    /// that would rather poll than implement the trait.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl ClientCallbacks for ChannelCallbacks {
    fn event_received(&self, event: Event) {
        let _ = self.events.send(event);
    }
}
