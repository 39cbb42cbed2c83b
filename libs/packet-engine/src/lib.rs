//! TUN device lifecycle, packet filtering/dedup, buffer pooling, and DoH
//! transport for the DNS-over-HTTPS proxy.

pub mod bufferpool;
pub mod callbacks;
pub mod dedup;
pub mod doh;
pub mod engine;
pub mod leak_guard;
pub mod tun;
pub mod wire;

pub use callbacks::Callbacks;
pub use engine::{EngineError, PacketEngine, ProxyState};
pub use tun::{Tun, TunConfig, TunError};
