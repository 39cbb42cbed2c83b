//! The proxy-side half of the channel: accept one client at a time, and on
//! disconnect resume accepting. No multi-client fan-out.

use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{Decoder, Encoder};
use crate::platform::{self, ServerStream};
use crate::SocketId;

pub struct Server {
    inner: platform::Server,
}

pub type ServerRead = FramedRead<ReadHalf<ServerStream>, Decoder>;
pub type ServerWrite = FramedWrite<WriteHalf<ServerStream>, Encoder>;

impl Server {
    pub fn new(id: SocketId) -> std::io::Result<Self> {
        Ok(Self {
            inner: platform::Server::new(id)?,
        })
    }

    /// Blocks until a client connects, then returns its framed read/write
    /// halves. Call again after the previous client's halves are dropped to
    /// resume accepting.
    pub async fn next_client(&mut self) -> std::io::Result<(ServerRead, ServerWrite)> {
        let stream = self.inner.next_client().await?;
        let (rx, tx) = tokio::io::split(stream);
        Ok((
            FramedRead::new(rx, Decoder::default()),
            FramedWrite::new(tx, Encoder::default()),
        ))
    }
}
