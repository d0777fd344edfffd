// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent process control.
//!
//! The supervisor never talks to the transfer protocol. It launches the
//! agent with a fixed flag set and controls it through [`ProcessHandle`]:
//! suspend, continue and kill. Exit is observed separately by the task that
//! owns the `tokio::process::Child` and reaps it.

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Command;

/// Default agent program, looked up on `PATH`.
pub const DEFAULT_AGENT_BINARY: &str = "aria2c";

/// Fixed agent flags: parallel connections, chunked split, resumable,
/// allocation-free, human-readable summaries once per second.
pub const AGENT_FLAGS: &[&str] = &[
    "--max-connection-per-server=16",
    "--split=16",
    "--min-split-size=1M",
    "--continue=true",
    "--max-concurrent-downloads=3",
    "--file-allocation=none",
    "--human-readable=true",
    "--summary-interval=1",
];

/// Control capability over one running agent.
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if the process has not been reaped yet.
    fn pid(&self) -> Option<u32>;

    /// Stop-the-world suspend (SIGSTOP on unix).
    fn suspend(&mut self) -> io::Result<()>;

    /// Continue a suspended process (SIGCONT on unix).
    fn resume(&mut self) -> io::Result<()>;

    /// Forcibly kill the process. Reaping is left to the exit watcher.
    fn terminate(&mut self) -> io::Result<()>;
}

/// Build the agent invocation for one transfer.
///
/// The URL is a single argv element, no shell is involved.
pub fn agent_command(program: &Path, url: &str, dir: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.arg(url)
        .arg(format!("--dir={}", dir.display()))
        .args(AGENT_FLAGS)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Handle to a spawned child, addressed by pid.
///
/// The `reaped` flag is raised by the exit watcher once `wait()` returns so
/// that late signals are refused instead of hitting a recycled pid.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    pid: u32,
    reaped: Arc<AtomicBool>,
}

impl ChildHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            reaped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the exit watcher.
    pub fn reaped_flag(&self) -> Arc<AtomicBool> {
        self.reaped.clone()
    }

    fn live_pid(&self) -> io::Result<u32> {
        if self.reaped.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("process {} already exited", self.pid),
            ));
        }
        Ok(self.pid)
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.live_pid().ok()
    }

    fn suspend(&mut self) -> io::Result<()> {
        send_signal(self.live_pid()?, libc::SIGSTOP)
    }

    fn resume(&mut self) -> io::Result<()> {
        send_signal(self.live_pid()?, libc::SIGCONT)
    }

    fn terminate(&mut self) -> io::Result<()> {
        send_signal(self.live_pid()?, libc::SIGKILL)
    }
}

// TODO: emulate pause on Windows by restarting the agent with --continue=true
#[cfg(not(unix))]
impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.live_pid().ok()
    }

    fn suspend(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "suspending a process is not supported on this platform",
        ))
    }

    fn resume(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "resuming a process is not supported on this platform",
        ))
    }

    fn terminate(&mut self) -> io::Result<()> {
        let pid = self.live_pid()?;
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("taskkill failed for process {}", pid),
            ))
        }
    }
}
