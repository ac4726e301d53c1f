//! External process control: killing leftover helpers by name and running a
//! child whose output is streamed into the log until it exits or the cancel
//! token fires.

use crate::error::{Result, WallError};
use log::{debug, info, log, warn, Level};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Kills every running process whose executable name matches one of `names`
/// (case-insensitive). Returns how many were signalled.
pub fn terminate_by_name(names: &[&str]) -> usize {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for (pid, process) in sys.processes() {
        let name = process.name().to_string_lossy();
        if !names.iter().any(|n| name.eq_ignore_ascii_case(n)) {
            continue;
        }
        info!("Terminating {} (PID: {})", name, pid);
        if process.kill() {
            killed += 1;
        } else {
            warn!("Failed to terminate {} (PID: {})", name, pid);
        }
    }
    killed
}

/// Runs `command` to completion, forwarding each stdout/stderr line to the
/// log prefixed with `label`. If `cancel` fires first the child is killed
/// and reaped before returning `WallError::Cancelled`.
pub async fn run_streaming(
    mut command: Command,
    label: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(WallError::Cancelled);
    }

    command.kill_on_drop(true);
    let (mut child, forwarders) = spawn_logged(command, label)?;

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            kill_child(&mut child, label).await;
            forwarders.abort();
            return Err(WallError::Cancelled);
        }
        status = child.wait() => status?,
    };
    forwarders.finish().await;

    if status.success() {
        Ok(())
    } else {
        Err(WallError::Process(format!("{} exited with {}", label, status)))
    }
}

/// Starts `command` and leaves it running. Its output still goes to the log
/// and a background task reaps it once it exits; that task's handle yields
/// the exit status.
pub fn spawn_detached(command: Command, label: &str) -> Result<JoinHandle<Option<ExitStatus>>> {
    let (mut child, forwarders) = spawn_logged(command, label)?;
    let label = label.to_string();
    Ok(tokio::spawn(async move {
        let status = match child.wait().await {
            Ok(status) => {
                debug!("{} exited with {}", label, status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed to wait for {}: {}", label, e);
                None
            }
        };
        forwarders.finish().await;
        status
    }))
}

fn spawn_logged(mut command: Command, label: &str) -> Result<(Child, Forwarders)> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    let mut child = command
        .spawn()
        .map_err(|e| WallError::Process(format!("Failed to start {}: {}", label, e)))?;

    let mut tasks = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        tasks.push(tokio::spawn(forward_lines(out, label.to_string(), Level::Info)));
    }
    if let Some(err) = child.stderr.take() {
        tasks.push(tokio::spawn(forward_lines(err, label.to_string(), Level::Warn)));
    }
    Ok((child, Forwarders(tasks)))
}

/// The tasks copying a child's pipes into the log.
struct Forwarders(Vec<JoinHandle<()>>);

impl Forwarders {
    /// Waits for the pipes to close. A grandchild that inherited them could
    /// hold them open indefinitely, so the wait is bounded.
    async fn finish(self) {
        for task in self.0 {
            let abort = task.abort_handle();
            if tokio::time::timeout(OUTPUT_GRACE, task).await.is_err() {
                abort.abort();
            }
        }
    }

    fn abort(self) {
        for task in self.0 {
            task.abort();
        }
    }
}

/// Logs `reader` line by line. Lines are raw bytes decoded lossily, since
/// helpers print file names in whatever code page the console uses. The
/// pipe is read to EOF even after an error so the child never sees a
/// closed pipe.
async fn forward_lines<R>(reader: R, label: String, level: Level)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                log!(level, "[{}] {}", label, line.trim_end());
            }
            Err(e) => {
                debug!("Reading {} output failed: {}", label, e);
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    debug!("Draining {} output failed: {}", label, e);
                }
                break;
            }
        }
    }
}

async fn kill_child(child: &mut Child, label: &str) {
    info!("Cancellation requested, killing {}", label);
    if let Err(e) = child.kill().await {
        debug!("Kill of {} failed (already exited?): {}", label, e);
    }
}
