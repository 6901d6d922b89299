use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::worker::command::PlotCommand;

/// Resolves once the process has exited and been reaped.
pub type ExitFuture = Pin<Box<dyn Future<Output = std::io::Result<ExitStatus>> + Send>>;

/// Ask a running process to stop.
pub trait ProcessHandle: Send + Sync {
    fn terminate(&self) -> std::io::Result<()>;
}

/// A started process split into the part that waits for it and the part
/// that can signal it, so the two can live in different tasks.
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub exit: ExitFuture,
    pub handle: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, command: &PlotCommand) -> std::io::Result<SpawnedProcess>;
}

/// Runs plot commands as real child processes.
///
/// Output is discarded; chia keeps its own logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, command: &PlotCommand) -> std::io::Result<SpawnedProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;

        let pid = child.id();
        tracing::debug!(pid = ?pid, command = %command, "Spawned process");

        Ok(SpawnedProcess {
            pid,
            exit: Box::pin(async move { child.wait().await }),
            handle: Box::new(SignalHandle { pid }),
        })
    }
}

/// Sends SIGTERM by pid.
#[derive(Debug, Clone, Copy)]
pub struct SignalHandle {
    pid: Option<u32>,
}

impl ProcessHandle for SignalHandle {
    fn terminate(&self) -> std::io::Result<()> {
        let pid = self.pid.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "process has no pid")
        })?;
        let raw = i32::try_from(pid).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range")
        })?;
        signal::kill(Pid::from_raw(raw), Signal::SIGTERM)?;
        Ok(())
    }
}

/// Human readable description of how a process ended.
pub fn describe_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(sig)) => match Signal::try_from(sig) {
            Ok(s) => format!("killed by {}", s),
            Err(_) => format!("killed by signal {}", sig),
        },
        (None, None) => "unknown exit status".to_string(),
    }
}
