//! An in-memory [`Tun`] used by packet-engine's own tests and available to
//! downstream integration tests that want to drive the dispatch pipeline
//! without a real network adapter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, Mutex, Notify};

use super::{Tun, TunError};

pub struct FakeTun {
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: Notify,
    is_closed: AtomicBool,
}

pub struct FakeTunHandle {
    pub inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub outbound_rx: StdMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl FakeTun {
    /// Builds a paired fake device and the test-side handle used to inject
    /// inbound datagrams and observe outbound ones.
    pub fn new() -> (Self, FakeTunHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let tun = Self {
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            closed: Notify::new(),
            is_closed: AtomicBool::new(false),
        };
        let handle = FakeTunHandle {
            inbound_tx,
            outbound_rx: StdMutex::new(outbound_rx),
        };
        (tun, handle)
    }
}

#[async_trait::async_trait]
impl Tun for FakeTun {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunError> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(TunError::Read("TUN handle closed".into()));
        }

        let mut rx = self.inbound_rx.lock().await;
        let next = tokio::select! {
            biased;
            _ = self.closed.notified() => None,
            packet = rx.recv() => packet,
        };

        match next {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => Err(TunError::Read("TUN handle closed".into())),
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<(), TunError> {
        self.outbound_tx
            .send(buf.to_vec())
            .map_err(|_| TunError::Write("fake TUN outbound channel closed".into()))
    }

    fn close(&self) {
        self.is_closed.store(true, Ordering::SeqCst);
        self.closed.notify_waiters();
    }
}
