// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download types shared by the supervisor, its events and the IPC layer.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use super::parser::{RATE_SENTINEL, REMAINING_SENTINEL};
use super::process::ProcessHandle;

/// Opaque identifier of one download, issued by the supervisor at start time.
///
/// Ids order by issue time, then sequence. Ids not issued by a supervisor
/// sort after those, lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    /// Build an id from the issuing timestamp and a per-supervisor sequence.
    ///
    /// The sequence keeps ids unique even when two starts share a millisecond.
    pub(crate) fn issue(millis: i64, sequence: u64) -> Self {
        Self(format!("{}-{}", millis, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn issue_order(&self) -> Option<(i64, u64)> {
        let (millis, sequence) = self.0.split_once('-')?;
        Some((millis.parse().ok()?, sequence.parse().ok()?))
    }
}

impl Ord for DownloadId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.issue_order(), other.issue_order()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for DownloadId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<String> for DownloadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DownloadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a download record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Agent running and transferring
    Downloading,
    /// Agent suspended by the caller
    Paused,
    /// Agent exited successfully
    Completed,
    /// Agent exited with a failure code or was killed externally
    Failed,
    /// Agent terminated by the caller
    Stopped,
}

impl DownloadStatus {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Stopped => "stopped",
        }
    }

    /// Terminal status for a process exit code.
    ///
    /// `None` means the agent was killed by a signal, which counts as failure.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => DownloadStatus::Completed,
            _ => DownloadStatus::Failed,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reading derived from one chunk of agent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Completion in percent, 0-100
    pub progress_percent: u8,
    /// Agent-formatted rate, e.g. "3.2MiB/s"
    pub transfer_rate: String,
    /// Agent-formatted ETA, e.g. "0:00:27"
    pub estimated_remaining: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            progress_percent: 0,
            transfer_rate: RATE_SENTINEL.to_string(),
            estimated_remaining: REMAINING_SENTINEL.to_string(),
        }
    }
}

/// One live transfer, owned by the supervisor's control task.
pub struct DownloadRecord {
    pub id: DownloadId,
    /// Sole owner of the agent process
    pub handle: Box<dyn ProcessHandle>,
    pub source_url: String,
    /// Absolute and guaranteed to exist when the record is created
    pub destination_dir: PathBuf,
    pub status: DownloadStatus,
}

impl DownloadRecord {
    pub fn new(
        id: DownloadId,
        handle: Box<dyn ProcessHandle>,
        source_url: impl Into<String>,
        destination_dir: PathBuf,
    ) -> Self {
        Self {
            id,
            handle,
            source_url: source_url.into(),
            destination_dir,
            status: DownloadStatus::Downloading,
        }
    }

    /// Read-only view for listings.
    pub fn info(&self) -> DownloadInfo {
        DownloadInfo {
            id: self.id.clone(),
            url: self.source_url.clone(),
            folder: self.destination_dir.clone(),
            status: self.status,
            is_magnet: is_magnet(&self.source_url),
        }
    }
}

impl fmt::Debug for DownloadRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRecord")
            .field("id", &self.id)
            .field("pid", &self.handle.pid())
            .field("source_url", &self.source_url)
            .field("destination_dir", &self.destination_dir)
            .field("status", &self.status)
            .finish()
    }
}

/// Snapshot of a live record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    #[serde(rename = "downloadId")]
    pub id: DownloadId,
    pub url: String,
    pub folder: PathBuf,
    pub status: DownloadStatus,
    pub is_magnet: bool,
}

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedDownload {
    pub download_id: DownloadId,
    pub folder: PathBuf,
}

/// Returns true for magnet links, which the agent handles as torrents.
pub fn is_magnet(url: &str) -> bool {
    url.starts_with("magnet:?")
}
