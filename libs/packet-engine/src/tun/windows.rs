//! Windows TUN device backed by the `wintun` crate.
//!
//! Wintun's session API is blocking, so a dedicated OS thread per direction
//! bridges it to the async `Tun` trait over channels. This isolation
//! pattern is preserved deliberately: closing the adapter does not reliably
//! unblock a thread parked in `Session::receive_blocking`, so the recv
//! thread is torn down by dropping the session rather than by asking it to
//! stop.

use std::net::SocketAddrV4;
use std::os::windows::process::CommandExt as _;
use std::process::Command;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;
use windows::Win32::NetworkManagement::IpHelper::{
    CreateUnicastIpAddressEntry, GetIpInterfaceEntry, InitializeUnicastIpAddressEntry,
    MIB_IPINTERFACE_ROW, MIB_UNICASTIPADDRESS_ROW, SetIpInterfaceEntry,
};
use windows::Win32::NetworkManagement::Ndis::NET_LUID_LH;
use windows::Win32::Networking::WinSock::AF_INET;

use super::{Tun, TunConfig, TunError};

/// Stable identity for the adapter so repeated Start/Stop cycles reuse the
/// same Windows network adapter object instead of piling up ghosts in the
/// Device Manager.
const TUNNEL_UUID: Uuid = Uuid::from_u128(0x7c6e_5a10_9d2b_4e77_8a1c_2f5e6b9d1a33);

/// Ring buffer size for the Wintun session, in bytes. 1 MiB matches the
/// default recommended by the `wintun` crate's own docs.
const RING_BUFFER_SIZE: u32 = 0x10_0000;

/// Creating a visible console window for every helper process is distracting
/// in a background service. `0x0800_0000 = CREATE_NO_WINDOW`.
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct WintunDevice {
    session: Arc<wintun::Session>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    recv_thread: Option<std::thread::JoinHandle<()>>,
    send_thread: Option<std::thread::JoinHandle<()>>,
}

impl WintunDevice {
    /// Opens the adapter, configures its IPv4 address/netmask/MTU, and
    /// pushes the DNS server per [`TunConfig`].
    pub fn open(config: &TunConfig) -> Result<Self, TunError> {
        // Expects `wintun.dll` to already be next to the proxy executable;
        // installing it there is the installer's job, out of scope here.
        let wintun = unsafe { wintun::load() }
            .map_err(|e| TunError::Open(format!("failed to load wintun.dll: {e}")))?;

        let adapter = wintun::Adapter::create(
            &wintun,
            config.iface_name,
            config.iface_name,
            Some(TUNNEL_UUID.as_u128()),
        )
        .map_err(|e| TunError::Open(format!("failed to create adapter: {e}")))?;

        let luid = adapter.get_luid();
        set_ip_address(luid, config.local_addr)
            .map_err(|e| TunError::Open(format!("failed to set interface address: {e}")))?;
        set_mtu(luid, config.mtu as u32)
            .map_err(|e| TunError::Open(format!("failed to set MTU: {e}")))?;
        push_dns_server(config.iface_name, config.dns_addr)
            .map_err(|e| TunError::Open(format!("failed to push DNS server: {e}")))?;

        let session = Arc::new(
            adapter
                .start_session(RING_BUFFER_SIZE)
                .map_err(|e| TunError::Open(format!("failed to start session: {e}")))?,
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);

        let recv_thread = spawn_recv_thread(inbound_tx, Arc::downgrade(&session))
            .map_err(|e| TunError::Open(format!("failed to spawn TUN recv thread: {e}")))?;
        let send_thread = spawn_send_thread(outbound_rx, Arc::downgrade(&session))
            .map_err(|e| TunError::Open(format!("failed to spawn TUN send thread: {e}")))?;

        Ok(Self {
            session,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            recv_thread: Some(recv_thread),
            send_thread: Some(send_thread),
        })
    }
}

impl Drop for WintunDevice {
    fn drop(&mut self) {
        let _ = self.session.shutdown();
        if let Some(t) = self.recv_thread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.send_thread.take() {
            let _ = t.join();
        }
    }
}

#[async_trait::async_trait]
impl Tun for WintunDevice {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunError> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
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
            .await
            .map_err(|_| TunError::Write("TUN write channel closed".into()))
    }

    /// Tears down the Wintun session, which is the only reliable way to
    /// unblock the recv thread's pending `receive_blocking` call.
    fn close(&self) {
        let _ = self.session.shutdown();
    }
}

fn spawn_recv_thread(
    packet_tx: mpsc::Sender<Vec<u8>>,
    session: Weak<wintun::Session>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tun-recv".into())
        .spawn(move || loop {
            let Some(session) = session.upgrade() else {
                break;
            };
            match session.receive_blocking() {
                Ok(packet) => {
                    if packet_tx.blocking_send(packet.bytes().to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        })
}

fn spawn_send_thread(
    mut packet_rx: mpsc::Receiver<Vec<u8>>,
    session: Weak<wintun::Session>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tun-send".into())
        .spawn(move || {
            while let Some(packet) = packet_rx.blocking_recv() {
                let Some(session) = session.upgrade() else {
                    break;
                };
                let Ok(len) = packet.len().try_into() else {
                    continue;
                };
                match session.allocate_send_packet(len) {
                    Ok(mut send_packet) => {
                        send_packet.bytes_mut().copy_from_slice(&packet);
                        session.send_packet(send_packet);
                    }
                    Err(_) => continue,
                }
            }
        })
}

/// Assigns the point-to-point interface's local address with a /24 prefix,
/// matching the fixed netmask `255.255.255.0` in [`TunConfig::default`].
fn set_ip_address(luid: wintun::NET_LUID_LH, addr: std::net::Ipv4Addr) -> windows::core::Result<()> {
    // SAFETY: both `NET_LUID_LH` unions carry the same `u64` value; wintun
    // doesn't reuse the `windows` crate's type for this field.
    let luid = NET_LUID_LH {
        Value: unsafe { luid.Value },
    };

    // SAFETY: `row` is a local stack value; Windows doesn't retain the pointer.
    let mut row: MIB_UNICASTIPADDRESS_ROW = unsafe { std::mem::zeroed() };
    unsafe { InitializeUnicastIpAddressEntry(&mut row) };

    row.InterfaceLuid = luid;
    row.ValidLifetime = 0xffff_ffff;
    row.Address.si_family = AF_INET;
    row.Address.Ipv4 = SocketAddrV4::new(addr, 0).into();
    row.OnLinkPrefixLength = 24;

    // SAFETY: `row` only contains local values; Windows does not store the pointer.
    unsafe { CreateUnicastIpAddressEntry(&row) }.ok()
}

fn set_mtu(luid: wintun::NET_LUID_LH, mtu: u32) -> windows::core::Result<()> {
    let luid = NET_LUID_LH {
        Value: unsafe { luid.Value },
    };

    let mut row = MIB_IPINTERFACE_ROW {
        Family: AF_INET,
        InterfaceLuid: luid,
        ..Default::default()
    };

    // SAFETY: `row` is a local stack value.
    unsafe { GetIpInterfaceEntry(&mut row) }.ok()?;
    row.SitePrefixLength = 0;
    row.NlMtu = mtu;
    // SAFETY: `row` is a local stack value.
    unsafe { SetIpInterfaceEntry(&mut row) }.ok()
}

/// Tells Windows to use `dns_addr` as the resolver for `iface_name`.
fn push_dns_server(iface_name: &str, dns_addr: std::net::Ipv4Addr) -> std::io::Result<()> {
    let status = Command::new("powershell")
        .creation_flags(CREATE_NO_WINDOW)
        .arg("-Command")
        .arg(format!(
            "Set-DnsClientServerAddress {iface_name} -ServerAddresses(\"{dns_addr}\")"
        ))
        .status()?;

    if !status.success() {
        return Err(std::io::Error::other(
            "Set-DnsClientServerAddress returned non-zero",
        ));
    }
    Ok(())
}
