//! Spawns and supervises the firewall-leak-prevention helper process.
//!
//! The only correctness requirement is that the child does not outlive the
//! proxy; graceful shutdown (newline to stdin) and forced termination are
//! both attempted, and errors from either are ignored, matching the helper's
//! documented "tolerates either mechanism working" contract.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::callbacks::Callbacks;

/// Conventional name of the leak-prevention helper, expected beside the
/// proxy executable.
pub const HELPER_EXE_NAME: &str = "dnsunleak.exe";

pub fn helper_path(proxy_exe_dir: &Path) -> PathBuf {
    proxy_exe_dir.join(HELPER_EXE_NAME)
}

/// A running (or failed-to-start) leak guard. Best-effort: if the helper
/// never started, the proxy continues without leak protection.
pub struct LeakGuard {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    supervisor: Option<JoinHandle<()>>,
}

impl LeakGuard {
    /// Spawns the helper at `exe_path`. On failure, reports via
    /// `callbacks.error_log` and returns a guard holding nothing — the
    /// proxy keeps running with no leak protection.
    pub fn spawn(exe_path: &Path, callbacks: Callbacks) -> Self {
        let mut command = Command::new(exe_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                callbacks.error(&format!(
                    "failed to start leak guard helper at {}: {error}",
                    exe_path.display()
                ));
                return Self {
                    child: None,
                    stdin: None,
                    supervisor: None,
                };
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let supervisor = tokio::spawn(supervise_output(stdout, stderr, callbacks));

        Self {
            child: Some(child),
            stdin,
            supervisor: Some(supervisor),
        }
    }

    /// Cooperative-then-forced shutdown: write a newline to stdin (ignoring
    /// errors), then kill the process (ignoring errors). Returns once the
    /// child has been reaped or we gave up waiting on it.
    pub async fn stop(mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"\n").await;
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

/// Reads the helper's merged stdout/stderr, one line per call to
/// `info_log`. Exits quietly once both streams reach EOF or the process is
/// killed out from under it.
async fn supervise_output(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    callbacks: Callbacks,
) {
    let stdout_task = stdout.map(|s| {
        let callbacks = callbacks.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(s).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                callbacks.info(&line);
            }
        })
    });

    let stderr_task = stderr.map(|s| {
        let callbacks = callbacks.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(s).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                callbacks.info(&line);
            }
        })
    });

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capturing_callbacks() -> (Callbacks, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        let callbacks = Callbacks {
            error_log: Arc::new(move |msg: &str| errors_clone.lock().unwrap().push(msg.to_string())),
            ..Callbacks::default()
        };
        (callbacks, errors)
    }

    #[tokio::test]
    async fn missing_helper_reports_error_and_proxy_keeps_running() {
        let (callbacks, errors) = capturing_callbacks();
        let guard = LeakGuard::spawn(Path::new("/no/such/dnsunleak.exe"), callbacks);
        assert!(guard.child.is_none());
        guard.stop().await;
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn helper_path_joins_conventional_name() {
        let dir = Path::new(r"C:\Program Files\proxy");
        assert_eq!(helper_path(dir), dir.join("dnsunleak.exe"));
    }
}
