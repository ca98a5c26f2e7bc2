//! Subprocess helpers: process-group isolation, tree termination and output capture.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Put the spawned process in its own process group so the whole tree can be signalled.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    cmd.kill_on_drop(true);
}

/// Force-terminate every process in the group led by `pgid`.
///
/// A group that has already exited is not an error.
#[cfg(unix)]
pub fn terminate_tree(pgid: u32) {
    // SAFETY: killpg has no memory-safety preconditions; a stale pgid only yields ESRCH.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid = pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
pub fn terminate_tree(pgid: u32) {
    debug!(pgid = pgid, "process groups unsupported; relying on direct child kill");
}

/// Resolves once the cancellation flag is set. Never resolves if the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drains a child pipe in the background into a shared buffer.
///
/// The buffer survives if the reader is aborted, so output read before a
/// kill is never lost.
pub struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputCapture {
    pub fn spawn<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let handle = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buffer, handle }
    }

    /// Wait up to `grace` for EOF, then return everything read so far.
    ///
    /// Background processes that inherited the pipe can hold it open after
    /// the step exits; the grace period bounds that wait.
    pub async fn finish(self, grace: Duration) -> String {
        let OutputCapture { buffer, mut handle } = self;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            debug!("output pipe still open after grace period; truncating capture");
            handle.abort();
        }
        let bytes = buffer.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).to_string()
    }
}
