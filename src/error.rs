// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for supervisor operations.
//!
//! Synchronous failures of `start`, `pause`, `resume` and `stop` come back
//! as [`DownloadError`]. Asynchronous failures (agent stderr, non-zero exit)
//! are never errors here; they travel as events.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use serde::Serialize;

use crate::download::{DownloadId, DownloadStatus};

/// Result alias for supervisor operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Failure of a supervisor operation. No state was changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadError {
    /// Missing or empty resource locator
    InvalidInput { message: String },

    /// Destination could not be created
    DirectoryError { path: PathBuf, message: String },

    /// No live record with this id
    NotFound { id: DownloadId },

    /// Operation not valid from the record's current status
    InvalidTransition {
        id: DownloadId,
        status: DownloadStatus,
        action: String,
    },

    /// Suspend/continue/kill could not be delivered
    ProcessSignalError {
        id: DownloadId,
        action: String,
        message: String,
    },

    /// The agent binary could not be launched
    SpawnError { program: PathBuf, message: String },

    /// The control task is gone (after shutdown)
    SupervisorClosed,
}

impl DownloadError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn directory(path: &Path, err: &io::Error) -> Self {
        tracing::warn!(path = %path.display(), error = %err, "destination directory unavailable");
        Self::DirectoryError {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn not_found(id: &DownloadId) -> Self {
        Self::NotFound { id: id.clone() }
    }

    pub fn signal(id: &DownloadId, action: &str, err: &io::Error) -> Self {
        tracing::error!(download_id = %id, action, error = %err, "process signal failed");
        Self::ProcessSignalError {
            id: id.clone(),
            action: action.to_string(),
            message: err.to_string(),
        }
    }

    pub fn spawn(program: &Path, err: &io::Error) -> Self {
        tracing::error!(program = %program.display(), error = %err, "failed to launch agent");
        Self::SpawnError {
            program: program.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// Snake-case name of the variant, matching the serialized `kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::InvalidInput { .. } => "invalid_input",
            DownloadError::DirectoryError { .. } => "directory_error",
            DownloadError::NotFound { .. } => "not_found",
            DownloadError::InvalidTransition { .. } => "invalid_transition",
            DownloadError::ProcessSignalError { .. } => "process_signal_error",
            DownloadError::SpawnError { .. } => "spawn_error",
            DownloadError::SupervisorClosed => "supervisor_closed",
        }
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::InvalidInput { message } => write!(f, "Invalid input: {}", message),
            DownloadError::DirectoryError { path, message } => {
                write!(f, "Cannot prepare directory {}: {}", path.display(), message)
            }
            DownloadError::NotFound { .. } => write!(f, "Download not found"),
            DownloadError::InvalidTransition { id, status, action } => {
                write!(f, "Cannot {} download {} while {}", action, id, status)
            }
            DownloadError::ProcessSignalError { id, action, message } => {
                write!(f, "Failed to {} download {}: {}", action, id, message)
            }
            DownloadError::SpawnError { program, message } => {
                write!(f, "Failed to launch {}: {}", program.display(), message)
            }
            DownloadError::SupervisorClosed => write!(f, "Download supervisor has shut down"),
        }
    }
}

impl std::error::Error for DownloadError {}

/// The `{error}` reply shape of the operation surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl From<&DownloadError> for ErrorResponse {
    fn from(err: &DownloadError) -> Self {
        Self {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}
