use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncload_config::MAX_CAPTURED_OUTPUT_BYTES;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ResolvedSyncCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Exit code; -1 when terminated by a signal.
    Exited(i32),
    TimedOut,
    LaunchFailed,
}

#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub exit: ProcessExit,
    pub output: Vec<u8>,
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Launch the command, wait for it or the deadline, whichever comes first.
/// On deadline the process group is killed and reaped before returning.
/// Output written before the kill is kept.
pub(crate) async fn run_with_deadline(
    cmd: &ResolvedSyncCommand,
    timeout: Duration,
    drain_grace: Duration,
) -> ProcessOutput {
    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ProcessOutput {
                exit: ProcessExit::LaunchFailed,
                output: format!("failed to launch {}: {e}", cmd.program).into_bytes(),
            }
        }
    };

    let buffer: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(drain(stdout, buffer.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(drain(stderr, buffer.clone())));
    }

    let exit = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => ProcessExit::Exited(status.code().unwrap_or(-1)),
        Ok(Err(e)) => {
            warn!("Failed waiting on {}: {}", cmd.program, e);
            append(&buffer, format!("wait failed: {e}").as_bytes());
            ProcessExit::Exited(-1)
        }
        Err(_) => {
            terminate(&mut child).await;
            ProcessExit::TimedOut
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(drain_grace, &mut reader).await.is_err() {
            debug!("Output of {} still open after exit; dropping the rest", cmd.program);
            reader.abort();
        }
    }

    let output = match buffer.lock() {
        Ok(mut buf) => std::mem::take(&mut *buf),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };

    ProcessOutput { exit, output }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        // The child leads its own group, so this also reaches anything it forked.
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("killpg({pid}) failed: {e}");
        }
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {e}");
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap killed process: {e}");
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, buffer: SharedBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => append(&buffer, &chunk[..n]),
        }
    }
}

fn append(buffer: &SharedBuffer, bytes: &[u8]) {
    if let Ok(mut buf) = buffer.lock() {
        let room = MAX_CAPTURED_OUTPUT_BYTES.saturating_sub(buf.len());
        buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }
}
