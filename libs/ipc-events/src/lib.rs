//! A reconnecting, newline-delimited JSON event channel between the proxy
//! process and a UI client, carried over a named local stream (`NextDNS`).

pub mod client;
pub mod codec;
pub mod event;
pub mod server;

pub use client::{Client, ClientCallbacks};
pub use event::{Event, EventData};
pub use server::Server;

#[cfg(windows)]
#[path = "platform/windows.rs"]
pub(crate) mod platform;

#[cfg(not(windows))]
#[path = "platform/unix.rs"]
pub(crate) mod platform;

/// Identifies which named endpoint to dial or bind. The product surface is
/// the fixed name `NextDNS`; the `Test` variant lets parallel test runs pick
/// distinct names so they don't collide.
#[derive(Clone, Copy, Debug)]
pub enum SocketId {
    Production,
    #[cfg(test)]
    Test(&'static str),
}
