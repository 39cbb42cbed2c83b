//! Named-pipe transport. Uses a permissive DACL so a non-admin UI client can
//! reach a proxy process running elevated, mirroring the reasoning (and the
//! exact Win32 call sequence) the teacher uses for its own IPC pipe.

use std::ffi::c_void;
use std::io::ErrorKind;

use tokio::net::windows::named_pipe;
use windows::Win32::Security as WinSec;

use crate::SocketId;

pub struct Server {
    pipe_path: String,
}

pub type ClientStream = named_pipe::NamedPipeClient;
pub type ServerStream = named_pipe::NamedPipeServer;

pub async fn connect_to_socket(id: SocketId) -> std::io::Result<ClientStream> {
    let path = pipe_path(id);
    named_pipe::ClientOptions::new().open(&path).map_err(|error| match error.kind() {
        ErrorKind::NotFound => std::io::Error::new(ErrorKind::NotFound, format!("no such pipe: {path}")),
        _ => error,
    })
}

impl Server {
    pub fn new(id: SocketId) -> std::io::Result<Self> {
        Ok(Self {
            pipe_path: pipe_path(id),
        })
    }

    pub async fn next_client(&mut self) -> std::io::Result<ServerStream> {
        // Re-binding immediately after a client disconnects can race Windows'
        // own pipe-instance cleanup; yielding once avoids spurious
        // access-denied errors on the next bind, same fix the teacher applies.
        tokio::task::yield_now().await;

        const NUM_ATTEMPTS: usize = 10;
        let mut last_err = None;
        for attempt in 0..NUM_ATTEMPTS {
            match create_pipe_server(&self.pipe_path) {
                Ok(server) => {
                    server.connect().await?;
                    return Ok(server);
                }
                Err(error) if error.kind() == ErrorKind::PermissionDenied => {
                    tracing::debug!(attempt, "pipe access denied, retrying");
                    last_err = Some(error);
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_err.unwrap_or_else(|| std::io::Error::other("failed to bind named pipe")))
    }
}

fn create_pipe_server(pipe_path: &str) -> std::io::Result<named_pipe::NamedPipeServer> {
    let mut server_options = named_pipe::ServerOptions::new();
    server_options.first_pipe_instance(true);

    let mut sd = WinSec::SECURITY_DESCRIPTOR::default();
    let psd = WinSec::PSECURITY_DESCRIPTOR(&mut sd as *mut _ as *mut c_void);
    // SAFETY: only pointers to local stack values are passed; Win32 does not
    // retain them past the call.
    unsafe {
        WinSec::InitializeSecurityDescriptor(psd, windows::Win32::System::SystemServices::SECURITY_DESCRIPTOR_REVISION)
            .map_err(std::io::Error::other)?;
        WinSec::SetSecurityDescriptorDacl(psd, true, None, false).map_err(std::io::Error::other)?;
    }

    let mut sa = WinSec::SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<WinSec::SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: psd.0,
        bInheritHandle: false.into(),
    };
    let sa_ptr = &mut sa as *mut _ as *mut c_void;
    // SAFETY: same as above; no threading or lifetime hazards, the raw
    // pointer does not outlive this call.
    unsafe { server_options.create_with_security_attributes_raw(pipe_path, sa_ptr) }
}

fn pipe_path(id: SocketId) -> String {
    let name = match id {
        SocketId::Production => "NextDNS".to_string(),
        #[cfg(test)]
        SocketId::Test(id) => format!("NextDNS_test_{id}"),
    };
    format!(r"\\.\pipe\{name}")
}
