// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download process supervisor.
//!
//! [`DownloadSupervisor`] is a cheap, cloneable handle. All state lives in a
//! single control task that owns the [`Registry`]; callers talk to it over a
//! command channel and the per-agent watcher tasks feed it output chunks and
//! exit notifications over a second channel. Every state transition therefore
//! happens on one task, in the order the messages arrive.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{DownloadError, DownloadResult};
use super::directory::prepare_destination;
use super::events::{DownloadEvent, EventSink};
use super::parser::parse_agent_output;
use super::process::{agent_command, ChildHandle, DEFAULT_AGENT_BINARY};
use super::registry::Registry;
use super::types::{
    is_magnet, DownloadId, DownloadInfo, DownloadRecord, DownloadStatus, StartedDownload,
};

/// Capacity of the caller -> control task command channel.
const COMMAND_BUFFER: usize = 100;

/// Read size for agent output pipes.
const READ_CHUNK_BYTES: usize = 4096;

/// Supervisor settings. The agent flag set is fixed and not part of this.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Agent program, resolved on `PATH` when not absolute
    pub agent_binary: PathBuf,
    /// Destination used when a start request has no folder
    pub default_dir: PathBuf,
}

impl SupervisorConfig {
    pub fn new(agent_binary: impl Into<PathBuf>, default_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent_binary: agent_binary.into(),
            default_dir: default_dir.into(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            agent_binary: PathBuf::from(DEFAULT_AGENT_BINARY),
            default_dir: crate::config::default_download_dir(),
        }
    }
}

/// Commands sent from handles to the control task.
#[derive(Debug)]
enum SupervisorCommand {
    Start {
        url: String,
        folder: PathBuf,
        reply: oneshot::Sender<DownloadResult<StartedDownload>>,
    },
    Pause {
        id: DownloadId,
        reply: oneshot::Sender<DownloadResult<()>>,
    },
    Resume {
        id: DownloadId,
        reply: oneshot::Sender<DownloadResult<()>>,
    },
    Stop {
        id: DownloadId,
        reply: oneshot::Sender<DownloadResult<()>>,
    },
    List {
        reply: oneshot::Sender<Vec<DownloadInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Messages from agent watcher tasks.
#[derive(Debug)]
enum AgentMessage {
    Stdout { id: DownloadId, chunk: String },
    Stderr { id: DownloadId, chunk: String },
    Exited { id: DownloadId, code: Option<i32> },
}

/// Handle to the supervisor's control task.
///
/// Dropping the last handle tears the supervisor down, killing every agent
/// that is still running.
#[derive(Clone)]
pub struct DownloadSupervisor {
    command_tx: mpsc::Sender<SupervisorCommand>,
    default_dir: PathBuf,
}

impl DownloadSupervisor {
    /// Start the control task. Must be called inside a tokio runtime.
    pub fn new(config: SupervisorConfig, sink: Arc<dyn EventSink>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (agent_tx, agent_rx) = mpsc::unbounded_channel();

        let control = ControlLoop::new(config.agent_binary, sink, agent_tx);
        tokio::spawn(control.run(command_rx, agent_rx));

        Self {
            command_tx,
            default_dir: config.default_dir,
        }
    }

    /// Launch a transfer of `url` into `folder` (or the default directory).
    pub async fn start(&self, url: &str, folder: Option<&str>) -> DownloadResult<StartedDownload> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::invalid_input("Invalid URL"));
        }

        let folder = prepare_destination(folder, &self.default_dir)?;

        let url = url.to_string();
        self.request(|reply| SupervisorCommand::Start { url, folder, reply })
            .await?
    }

    /// Suspend a downloading transfer.
    pub async fn pause(&self, id: &DownloadId) -> DownloadResult<()> {
        let id = id.clone();
        self.request(|reply| SupervisorCommand::Pause { id, reply }).await?
    }

    /// Continue a paused transfer.
    pub async fn resume(&self, id: &DownloadId) -> DownloadResult<()> {
        let id = id.clone();
        self.request(|reply| SupervisorCommand::Resume { id, reply }).await?
    }

    /// Kill a transfer. The id is unknown to every later operation.
    pub async fn stop(&self, id: &DownloadId) -> DownloadResult<()> {
        let id = id.clone();
        self.request(|reply| SupervisorCommand::Stop { id, reply }).await?
    }

    /// Snapshot of all live downloads.
    pub async fn list(&self) -> DownloadResult<Vec<DownloadInfo>> {
        self.request(|reply| SupervisorCommand::List { reply }).await
    }

    /// Kill every live agent and stop the control task.
    ///
    /// Returns the number of termination attempts. Individual kill failures
    /// are logged, never returned.
    pub async fn shutdown(&self) -> DownloadResult<usize> {
        self.request(|reply| SupervisorCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> DownloadResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DownloadError::SupervisorClosed)?;
        reply_rx.await.map_err(|_| DownloadError::SupervisorClosed)
    }
}

/// State owned by the control task.
struct ControlLoop {
    registry: Registry,
    /// Stopped records waiting for their agent to be reaped
    terminating: HashMap<DownloadId, DownloadRecord>,
    agent_binary: PathBuf,
    sink: Arc<dyn EventSink>,
    agent_tx: mpsc::UnboundedSender<AgentMessage>,
    sequence: u64,
}

impl ControlLoop {
    fn new(
        agent_binary: PathBuf,
        sink: Arc<dyn EventSink>,
        agent_tx: mpsc::UnboundedSender<AgentMessage>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            terminating: HashMap::new(),
            agent_binary,
            sink,
            agent_tx,
            sequence: 0,
        }
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SupervisorCommand>,
        mut agent_rx: mpsc::UnboundedReceiver<AgentMessage>,
    ) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(SupervisorCommand::Shutdown { reply }) => {
                        let attempts = self.teardown();
                        let _ = reply.send(attempts);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("all supervisor handles dropped");
                        self.teardown();
                        break;
                    }
                },
                Some(message) = agent_rx.recv() => self.handle_agent(message),
            }
        }
    }

    fn handle_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Start { url, folder, reply } => {
                let _ = reply.send(self.start(url, folder));
            }
            SupervisorCommand::Pause { id, reply } => {
                let _ = reply.send(self.pause(&id));
            }
            SupervisorCommand::Resume { id, reply } => {
                let _ = reply.send(self.resume(&id));
            }
            SupervisorCommand::Stop { id, reply } => {
                let _ = reply.send(self.stop(&id));
            }
            SupervisorCommand::List { reply } => {
                let _ = reply.send(self.registry.infos());
            }
            // handled by the loop itself
            SupervisorCommand::Shutdown { .. } => {}
        }
    }

    fn next_id(&mut self) -> DownloadId {
        let id = DownloadId::issue(Utc::now().timestamp_millis(), self.sequence);
        self.sequence += 1;
        id
    }

    fn start(&mut self, url: String, folder: PathBuf) -> DownloadResult<StartedDownload> {
        let mut child = agent_command(&self.agent_binary, &url, &folder)
            .spawn()
            .map_err(|e| DownloadError::spawn(&self.agent_binary, &e))?;

        let pid = child.id().ok_or_else(|| {
            let err = std::io::Error::new(std::io::ErrorKind::Other, "agent exited during spawn");
            DownloadError::spawn(&self.agent_binary, &err)
        })?;

        let id = self.next_id();
        let handle = ChildHandle::new(pid);
        let reaped = handle.reaped_flag();

        if is_magnet(&url) {
            info!(download_id = %id, pid, folder = %folder.display(), "starting torrent download");
        } else {
            info!(download_id = %id, pid, url = %url, folder = %folder.display(), "starting download");
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::spawn(watch_agent(
            id.clone(),
            child,
            stdout,
            stderr,
            reaped,
            self.agent_tx.clone(),
        ));

        let record = DownloadRecord::new(id.clone(), Box::new(handle), url, folder.clone());
        if let Err(mut duplicate) = self.registry.insert(record) {
            // unreachable with sequence-based ids; never leave an orphan agent
            error!(download_id = %duplicate.id, "duplicate download id, killing agent");
            let _ = duplicate.handle.terminate();
            return Err(DownloadError::invalid_input("duplicate download id"));
        }

        Ok(StartedDownload {
            download_id: id,
            folder,
        })
    }

    fn pause(&mut self, id: &DownloadId) -> DownloadResult<()> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| DownloadError::not_found(id))?;

        if record.status != DownloadStatus::Downloading {
            return Err(DownloadError::InvalidTransition {
                id: id.clone(),
                status: record.status,
                action: "pause".to_string(),
            });
        }

        record
            .handle
            .suspend()
            .map_err(|e| DownloadError::signal(id, "pause", &e))?;
        record.status = DownloadStatus::Paused;
        info!(download_id = %id, "download paused");

        self.sink.emit(DownloadEvent::StatusChange {
            download_id: id.clone(),
            status: DownloadStatus::Paused,
        });
        Ok(())
    }

    fn resume(&mut self, id: &DownloadId) -> DownloadResult<()> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| DownloadError::not_found(id))?;

        if record.status != DownloadStatus::Paused {
            return Err(DownloadError::InvalidTransition {
                id: id.clone(),
                status: record.status,
                action: "resume".to_string(),
            });
        }

        record
            .handle
            .resume()
            .map_err(|e| DownloadError::signal(id, "resume", &e))?;
        record.status = DownloadStatus::Downloading;
        info!(download_id = %id, "download resumed");

        self.sink.emit(DownloadEvent::StatusChange {
            download_id: id.clone(),
            status: DownloadStatus::Downloading,
        });
        Ok(())
    }

    fn stop(&mut self, id: &DownloadId) -> DownloadResult<()> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| DownloadError::not_found(id))?;

        record
            .handle
            .terminate()
            .map_err(|e| DownloadError::signal(id, "stop", &e))?;

        if let Some(mut record) = self.registry.remove(id) {
            record.status = DownloadStatus::Stopped;
            self.terminating.insert(id.clone(), record);
        }
        info!(download_id = %id, "download stopped");

        self.sink.emit(DownloadEvent::StatusChange {
            download_id: id.clone(),
            status: DownloadStatus::Stopped,
        });
        Ok(())
    }

    fn handle_agent(&mut self, message: AgentMessage) {
        match message {
            AgentMessage::Stdout { id, chunk } => {
                let Some(record) = self.registry.get(&id) else {
                    return;
                };
                let snapshot = parse_agent_output(&chunk);
                debug!(
                    download_id = %id,
                    percent = snapshot.progress_percent,
                    rate = %snapshot.transfer_rate,
                    eta = %snapshot.estimated_remaining,
                    "progress"
                );
                self.sink.emit(DownloadEvent::Progress {
                    download_id: id,
                    snapshot,
                    status: record.status,
                });
            }
            AgentMessage::Stderr { id, chunk } => {
                if !self.registry.contains(&id) {
                    return;
                }
                warn!(download_id = %id, "agent error output: {}", chunk.trim_end());
                self.sink.emit(DownloadEvent::Error {
                    download_id: id,
                    error: chunk,
                });
            }
            AgentMessage::Exited { id, code } => {
                let status = if let Some(mut record) = self.registry.remove(&id) {
                    record.status = DownloadStatus::from_exit_code(code);
                    record.status
                } else if self.terminating.remove(&id).is_some() {
                    DownloadStatus::Stopped
                } else {
                    return;
                };

                match status {
                    DownloadStatus::Failed => {
                        warn!(download_id = %id, exit_code = ?code, "download failed")
                    }
                    _ => info!(download_id = %id, exit_code = ?code, status = %status, "agent exited"),
                }

                self.sink.emit(DownloadEvent::Complete {
                    download_id: id,
                    status,
                    exit_code: code,
                });
            }
        }
    }

    /// Best-effort kill of every live agent. Returns the number of attempts.
    fn teardown(&mut self) -> usize {
        let records = self.registry.drain();
        let attempts = records.len();

        for mut record in records {
            if let Err(e) = record.handle.terminate() {
                error!(download_id = %record.id, error = %e, "failed to kill agent during shutdown");
            }
        }
        self.terminating.clear();

        if attempts > 0 {
            info!(killed = attempts, "supervisor shut down");
        }
        attempts
    }
}

/// Incremental UTF-8 decoding of a byte stream.
///
/// A multibyte sequence cut by a read boundary is held back until the rest
/// arrives. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete tail, wait for the next read
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at EOF.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Forward one agent pipe to the control task, chunk by chunk.
async fn forward_stream<R>(
    id: DownloadId,
    stream: Option<R>,
    tx: mpsc::UnboundedSender<AgentMessage>,
    stderr: bool,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut carry = Utf8Carry::default();

    let send = |chunk: String| {
        if chunk.is_empty() {
            return true;
        }
        let message = if stderr {
            AgentMessage::Stderr { id: id.clone(), chunk }
        } else {
            AgentMessage::Stdout { id: id.clone(), chunk }
        };
        tx.send(message).is_ok()
    };

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !send(carry.push(&buf[..n])) {
                    return;
                }
            }
            Err(e) => {
                debug!(download_id = %id, error = %e, "agent pipe read failed");
                break;
            }
        }
    }

    send(carry.finish());
}

/// Drain both pipes, reap the agent, then report its exit.
///
/// The exit message is sent only after both pipes hit EOF, so it is always
/// the last message for its id.
async fn watch_agent(
    id: DownloadId,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    reaped: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<AgentMessage>,
) {
    let wait = async {
        let status = child.wait().await;
        reaped.store(true, Ordering::Release);
        status
    };

    let (_, _, status) = tokio::join!(
        forward_stream(id.clone(), stdout, tx.clone(), false),
        forward_stream(id.clone(), stderr, tx.clone(), true),
        wait,
    );

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(download_id = %id, error = %e, "failed to wait for agent");
            None
        }
    };

    let _ = tx.send(AgentMessage::Exited { id, code });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use crate::download::events::CallbackSink;
    use crate::download::process::ProcessHandle;

    /// Handle whose signals all fail, like an agent that is already gone.
    struct RefusingHandle;

    impl ProcessHandle for RefusingHandle {
        fn pid(&self) -> Option<u32> {
            None
        }
        fn suspend(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such process"))
        }
        fn resume(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such process"))
        }
        fn terminate(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such process"))
        }
    }

    struct ObedientHandle;

    impl ProcessHandle for ObedientHandle {
        fn pid(&self) -> Option<u32> {
            Some(1)
        }
        fn suspend(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn resume(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn terminate(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn control_with_sink() -> (ControlLoop, Arc<Mutex<Vec<DownloadEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink = CallbackSink(move |event: DownloadEvent| sink_seen.lock().unwrap().push(event));
        let (agent_tx, _agent_rx) = mpsc::unbounded_channel();
        let control = ControlLoop::new(PathBuf::from("aria2c"), Arc::new(sink), agent_tx);
        (control, seen)
    }

    fn insert(control: &mut ControlLoop, id: &str, handle: Box<dyn ProcessHandle>) -> DownloadId {
        let id = DownloadId::from(id);
        let record = DownloadRecord::new(id.clone(), handle, "https://example.com/a", PathBuf::from("/tmp"));
        control.registry.insert(record).unwrap();
        id
    }

    // =========================================================================
    // SIGNAL FAILURES
    // =========================================================================

    #[test]
    fn test_failed_pause_leaves_record_unchanged() {
        let (mut control, seen) = control_with_sink();
        let id = insert(&mut control, "1-0", Box::new(RefusingHandle));

        let err = control.pause(&id).unwrap_err();

        assert!(matches!(err, DownloadError::ProcessSignalError { .. }), "got {:?}", err);
        assert_eq!(control.registry.get(&id).unwrap().status, DownloadStatus::Downloading);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_resume_leaves_record_paused() {
        let (mut control, seen) = control_with_sink();
        let id = insert(&mut control, "1-0", Box::new(RefusingHandle));
        control.registry.get_mut(&id).unwrap().status = DownloadStatus::Paused;

        let err = control.resume(&id).unwrap_err();

        assert!(matches!(err, DownloadError::ProcessSignalError { .. }));
        assert_eq!(control.registry.get(&id).unwrap().status, DownloadStatus::Paused);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_stop_keeps_record_live() {
        let (mut control, seen) = control_with_sink();
        let id = insert(&mut control, "1-0", Box::new(RefusingHandle));

        let err = control.stop(&id).unwrap_err();

        assert!(matches!(err, DownloadError::ProcessSignalError { .. }));
        assert_eq!(control.registry.infos().len(), 1);
        assert_eq!(control.registry.get(&id).unwrap().status, DownloadStatus::Downloading);
        assert!(control.terminating.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_parks_record_until_exit() {
        let (mut control, seen) = control_with_sink();
        let id = insert(&mut control, "1-0", Box::new(ObedientHandle));

        control.stop(&id).unwrap();
        assert!(!control.registry.contains(&id));
        assert!(control.terminating.contains_key(&id));

        control.handle_agent(AgentMessage::Exited { id: id.clone(), code: None });
        assert!(control.terminating.is_empty());

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                DownloadEvent::StatusChange { download_id: id.clone(), status: DownloadStatus::Stopped },
                DownloadEvent::Complete { download_id: id, status: DownloadStatus::Stopped, exit_code: None },
            ]
        );
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    #[test]
    fn test_teardown_survives_failed_kills() {
        let (mut control, seen) = control_with_sink();
        insert(&mut control, "1-0", Box::new(RefusingHandle));
        insert(&mut control, "1-1", Box::new(ObedientHandle));
        insert(&mut control, "1-2", Box::new(RefusingHandle));

        let attempts = control.teardown();

        assert_eq!(attempts, 3);
        assert!(control.registry.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    // =========================================================================
    // OUTPUT DECODING
    // =========================================================================

    #[test]
    fn test_carry_joins_split_multibyte_character() {
        let mut carry = Utf8Carry::default();
        let e_acute = "é".as_bytes();

        let first = carry.push(&[b"abc".as_slice(), &e_acute[..1]].concat());
        let second = carry.push(&[&e_acute[1..], b"\n".as_slice()].concat());

        assert_eq!(first, "abc");
        assert_eq!(second, "é\n");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn test_carry_waits_for_four_byte_sequence() {
        let mut carry = Utf8Carry::default();
        let bytes = "🦀".as_bytes();

        assert_eq!(carry.push(&bytes[..1]), "");
        assert_eq!(carry.push(&bytes[1..3]), "");
        assert_eq!(carry.push(&bytes[3..]), "🦀");
    }

    #[test]
    fn test_carry_replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();

        assert_eq!(carry.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_carry_flushes_truncated_tail_at_eof() {
        let mut carry = Utf8Carry::default();

        assert_eq!(carry.push(&"é".as_bytes()[..1]), "");
        assert_eq!(carry.finish(), "\u{FFFD}");
    }
}
