// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! ariaflow - supervisor for external download agents
//!
//! Launches an external download agent (aria2c by default) per transfer,
//! tracks each transfer's lifecycle, turns the agent's human-readable output
//! into structured progress events and lets callers pause, resume or stop
//! each transfer independently. Plain HTTP/FTP URLs and magnet links are
//! handled the same way: the agent does the protocol work.
//!
//! # Core Modules
//!
//! - [`download`] - Supervisor, output parser, process control, events
//! - [`error`] - Error taxonomy of supervisor operations
//! - [`config`] - User configuration (`~/.ariaflow/config.json`)
//! - [`ipc`] - JSON-lines front end for UI processes
//! - [`locks`] - Poison-recovering lock helpers

pub mod config;
pub mod download;
pub mod error;
pub mod ipc;
pub mod locks;

// Re-export commonly used types from download
pub use download::{
    parse_agent_output, DownloadEvent, DownloadId, DownloadInfo, DownloadStatus,
    DownloadSupervisor, EventHub, EventSink, ProgressSnapshot, StartedDownload, SupervisorConfig,
};

// Re-export error types
pub use error::{DownloadError, DownloadResult, ErrorResponse};

// Re-export config helpers
pub use config::{load_config, save_config, Config};
