//! Unix-domain-socket fallback so the IPC channel can be exercised by tests
//! and dev builds on non-Windows hosts. Not part of the externally specified
//! product surface (the product is Windows-only), but the same framing and
//! client/server contract applies verbatim.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use tokio::net::{UnixListener, UnixStream};

use crate::SocketId;

pub struct Server {
    listener: UnixListener,
    id: SocketId,
}

pub type ClientStream = UnixStream;
pub type ServerStream = UnixStream;

impl Drop for Server {
    fn drop(&mut self) {
        let path = socket_path(self.id);
        if let Err(error) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), %error, "failed to remove IPC socket");
        }
    }
}

pub async fn connect_to_socket(id: SocketId) -> std::io::Result<ClientStream> {
    let path = socket_path(id);
    UnixStream::connect(&path).await.map_err(|error| match error.kind() {
        ErrorKind::NotFound => std::io::Error::new(ErrorKind::NotFound, format!("no such socket: {}", path.display())),
        _ => error,
    })
}

impl Server {
    pub fn new(id: SocketId) -> std::io::Result<Self> {
        let path = socket_path(id);
        let _ = std::fs::remove_file(&path);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660))?;
        Ok(Self { listener, id })
    }

    pub async fn next_client(&mut self) -> std::io::Result<ServerStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }
}

fn socket_path(id: SocketId) -> PathBuf {
    let name = match id {
        SocketId::Production => "nextdns.sock".to_string(),
        #[cfg(test)]
        SocketId::Test(id) => format!("nextdns_test_{id}.sock"),
    };
    std::env::temp_dir().join(name)
}
