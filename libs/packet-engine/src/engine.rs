//! Owns the TUN handle and runs the read / filter / dispatch / write
//! pipeline described in the design: dispatcher reads inbound datagrams,
//! filters and deduplicates them, spawns a parallel resolution task per
//! surviving query, and a single writer task serializes replies back onto
//! the device.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::bufferpool::{BufferPool, PooledBuffer, BUFFER_SIZE};
use crate::callbacks::Callbacks;
use crate::dedup::Deduplicator;
use crate::doh::Transport;
use crate::leak_guard::LeakGuard;
use crate::tun::{Tun, TunConfig, TunError};
use crate::wire;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open TUN device: {0}")]
    TunOpen(#[from] TunError),
}

/// Minimum length for an IPv4+UDP prefix to be present at all.
const MIN_DATAGRAM_LEN: usize = 20;
/// IP protocol number for UDP.
const IPPROTO_UDP: u8 = 17;
/// Offset of the destination address within the IPv4 header.
const DST_ADDR_OFFSET: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyState {
    Stopped,
    Running,
}

struct Running {
    tun: Arc<dyn Tun>,
    cancel: CancellationToken,
    outbound_tx: mpsc::Sender<(PooledBuffer, usize)>,
    leak_guard: Option<LeakGuard>,
    dispatch_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

/// The packet engine. Exactly one `Start` may be outstanding at a time; a
/// second `Start` on an already-`Running` engine is a no-op, as is a `Stop`
/// on an already-`Stopped` one.
pub struct PacketEngine {
    state: Mutex<Option<Running>>,
    callbacks: Mutex<Callbacks>,
    pool: BufferPool,
}

impl Default for PacketEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(None),
            callbacks: Mutex::new(Callbacks::default()),
            pool: BufferPool::new(),
        }
    }
}

impl PacketEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> ProxyState {
        if self.state.lock().await.is_some() {
            ProxyState::Running
        } else {
            ProxyState::Stopped
        }
    }

    /// `Stopped -> Running`. Opens the TUN device via `open_tun` (so callers
    /// supply either the real `WintunDevice` or a test double), spawns the
    /// reader/dispatch, writer, and leak-guard tasks, and returns once they
    /// are spawned — it does not block on the engine's lifetime.
    ///
    /// Re-entrant calls while already `Running` are a no-op (`Ok(())`
    /// without firing `state-change` again).
    pub async fn start(
        &self,
        tun_config: &TunConfig,
        open_tun: impl FnOnce(&TunConfig) -> Result<Arc<dyn Tun>, TunError>,
        transport: Arc<dyn Transport>,
        leak_guard_exe: Option<PathBuf>,
        callbacks: Callbacks,
    ) -> Result<(), EngineError> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let tun = open_tun(tun_config)?;
        *self.callbacks.lock().await = callbacks.clone();

        let leak_guard = leak_guard_exe.map(|path| LeakGuard::spawn(&path, callbacks.clone()));

        let (outbound_tx, outbound_rx) = mpsc::channel::<(PooledBuffer, usize)>(256);
        let cancel = CancellationToken::new();

        let writer_task = tokio::spawn(run_writer(
            tun.clone(),
            outbound_rx,
            callbacks.clone(),
        ));

        let dispatch_task = tokio::spawn(run_dispatch(
            tun.clone(),
            tun_config.dns_addr,
            transport,
            outbound_tx.clone(),
            self.pool.clone(),
            cancel.clone(),
            callbacks.clone(),
        ));

        *guard = Some(Running {
            tun,
            cancel,
            outbound_tx,
            leak_guard,
            dispatch_task,
            writer_task,
        });
        drop(guard);

        callbacks.state_change(true);
        Ok(())
    }

    /// `Running -> Stopped`. Closes the TUN handle (the only reliable way to
    /// unblock a reader stuck in a blocking device read) and signals
    /// cancellation to any in-flight per-query tasks. Waits for the
    /// dispatcher and writer tasks to finish before firing `state-change(false)`.
    ///
    /// Re-entrant calls while already `Stopped` are a no-op.
    pub async fn stop(&self) {
        let running = {
            let mut guard = self.state.lock().await;
            guard.take()
        };

        let Some(running) = running else {
            return;
        };

        running.tun.close();
        running.cancel.cancel();
        drop(running.outbound_tx);

        let _ = running.dispatch_task.await;
        let _ = running.writer_task.await;

        if let Some(leak_guard) = running.leak_guard {
            leak_guard.stop().await;
        }

        let callbacks = self.callbacks.lock().await.clone();
        callbacks.state_change(false);
    }
}

async fn run_dispatch(
    tun: Arc<dyn Tun>,
    proxy_dns_ip: Ipv4Addr,
    transport: Arc<dyn Transport>,
    outbound_tx: mpsc::Sender<(PooledBuffer, usize)>,
    pool: BufferPool,
    cancel: CancellationToken,
    callbacks: Callbacks,
) {
    let mut dedup = Deduplicator::new();
    let dns_octets = proxy_dns_ip.octets();

    loop {
        let mut buf = pool.acquire();
        let len = match tun.read(buf.as_mut_slice()).await {
            Ok(len) => len,
            Err(_) => break, // handle closed; reader must exit promptly
        };

        if len <= MIN_DATAGRAM_LEN {
            continue;
        }
        let datagram = buf.truncate_view(len);
        if datagram[9] != IPPROTO_UDP {
            continue;
        }
        if datagram[DST_ADDR_OFFSET..DST_ADDR_OFFSET + 4] != dns_octets {
            continue;
        }

        let msg_id = wire::extract_msg_id(datagram);
        if dedup.is_duplicate(msg_id) {
            continue;
        }

        let transport = transport.clone();
        let outbound_tx = outbound_tx.clone();
        let cancel = cancel.clone();
        let callbacks = callbacks.clone();

        tokio::spawn(async move {
            run_query(buf, len, msg_id, transport, outbound_tx, cancel, callbacks).await;
        });
    }
}

async fn run_query(
    mut buf: PooledBuffer,
    len: usize,
    msg_id: u16,
    transport: Arc<dyn Transport>,
    outbound_tx: mpsc::Sender<(PooledBuffer, usize)>,
    cancel: CancellationToken,
    callbacks: Callbacks,
) {
    let qname = wire::extract_qname(buf.truncate_view(len));
    callbacks.query(msg_id, &qname);

    let query = buf.truncate_view(len).to_vec();
    let response = match transport.resolve(&query).await {
        Ok(body) => body,
        Err(error) => {
            callbacks.error(&format!("resolve failed for query {msg_id:#06x}: {error}"));
            return; // buf drops here, returning to the pool
        }
    };

    let written = copy_response_into_buffer(buf.as_mut_slice(), &response);

    if cancel.is_cancelled() {
        return; // stop fired before handoff; drop the buffer
    }

    let _ = outbound_tx.send((buf, written)).await;
}

/// Writes the response body into `buf` starting at
/// [`wire::IP_UDP_HEADER_LEN`], preserving the original query's IP/UDP
/// header (`buf[0..IP_UDP_HEADER_LEN]`) so the outbound datagram is still
/// addressed back to the OS resolver. Sets the DNS TC bit if the body
/// doesn't fit in the remaining capacity. Returns the total datagram length
/// (header plus however much of the body was written).
fn copy_response_into_buffer(buf: &mut [u8], body: &[u8]) -> usize {
    let capacity = BUFFER_SIZE - wire::IP_UDP_HEADER_LEN;
    let n = body.len().min(capacity);
    buf[wire::IP_UDP_HEADER_LEN..wire::IP_UDP_HEADER_LEN + n].copy_from_slice(&body[..n]);
    if body.len() > capacity {
        wire::mark_truncated(&mut buf[wire::IP_UDP_HEADER_LEN..]);
    }
    wire::IP_UDP_HEADER_LEN + n
}

async fn run_writer(
    tun: Arc<dyn Tun>,
    mut outbound_rx: mpsc::Receiver<(PooledBuffer, usize)>,
    callbacks: Callbacks,
) {
    while let Some((buf, len)) = outbound_rx.recv().await {
        if let Err(error) = tun.write(buf.truncate_view(len)).await {
            callbacks.error(&format!("TUN write failed: {error}"));
            break; // packet loss until Stop/Start, per the write-error contract
        }
        // `buf` drops here and is returned to the pool.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_response_into_buffer_preserves_header_and_writes_body_after_it() {
        let mut buf = vec![0u8; BUFFER_SIZE];
        buf[..wire::IP_UDP_HEADER_LEN].copy_from_slice(&[0xAAu8; wire::IP_UDP_HEADER_LEN]);

        let written = copy_response_into_buffer(&mut buf, b"reply");

        assert_eq!(written, wire::IP_UDP_HEADER_LEN + 5);
        assert_eq!(&buf[..wire::IP_UDP_HEADER_LEN], &[0xAAu8; wire::IP_UDP_HEADER_LEN][..]);
        assert_eq!(&buf[wire::IP_UDP_HEADER_LEN..written], b"reply");
    }

    #[test]
    fn copy_response_into_buffer_sets_tc_bit_and_caps_length_when_body_overflows() {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let capacity = BUFFER_SIZE - wire::IP_UDP_HEADER_LEN;
        let body = vec![0x11u8; capacity + 100];

        let written = copy_response_into_buffer(&mut buf, &body);

        assert_eq!(written, BUFFER_SIZE);
        let flags_byte = buf[wire::IP_UDP_HEADER_LEN + 2];
        assert_eq!(flags_byte & 0b0000_0010, 0b0000_0010);
    }

    #[test]
    fn copy_response_into_buffer_does_not_set_tc_bit_when_body_fits() {
        let mut buf = vec![0u8; BUFFER_SIZE];
        let body = vec![0x00u8; 10];

        copy_response_into_buffer(&mut buf, &body);

        let flags_byte = buf[wire::IP_UDP_HEADER_LEN + 2];
        assert_eq!(flags_byte & 0b0000_0010, 0);
    }
}
