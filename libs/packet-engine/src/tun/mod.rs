//! Abstraction over the TUN device so the dispatch/resolver/writer pipeline
//! can be exercised against an in-memory fake in tests.

use thiserror::Error;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WintunDevice;

#[cfg(any(test, not(windows)))]
pub mod fake;

/// Fixed parameters for the virtual point-to-point interface this proxy
/// claims, per the external interface contract.
#[derive(Clone, Debug)]
pub struct TunConfig {
    pub iface_name: &'static str,
    pub local_addr: std::net::Ipv4Addr,
    pub peer_addr: std::net::Ipv4Addr,
    pub netmask: std::net::Ipv4Addr,
    pub dns_addr: std::net::Ipv4Addr,
    pub mtu: u16,
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            iface_name: "tun0",
            local_addr: std::net::Ipv4Addr::new(192, 0, 2, 43),
            peer_addr: std::net::Ipv4Addr::new(192, 0, 2, 42),
            netmask: std::net::Ipv4Addr::new(255, 255, 255, 0),
            dns_addr: std::net::Ipv4Addr::new(192, 0, 2, 42),
            mtu: 1500,
        }
    }
}

#[derive(Debug, Error)]
pub enum TunError {
    #[error("failed to open TUN device: {0}")]
    Open(String),
    #[error("TUN read error: {0}")]
    Read(String),
    #[error("TUN write error: {0}")]
    Write(String),
}

/// A byte-level duplex device. `read` yields inbound datagrams produced by
/// the OS; `write` delivers outbound datagrams back to the OS. `close`
/// unblocks any in-flight `read` — it is the only reliable wake mechanism
/// when the reader task is stuck in a blocking device read, a known
/// limitation of the underlying TUN library that this abstraction's
/// isolation pattern exists to work around.
#[async_trait::async_trait]
pub trait Tun: Send + Sync {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunError>;
    async fn write(&self, buf: &[u8]) -> Result<(), TunError>;
    fn close(&self);
}
