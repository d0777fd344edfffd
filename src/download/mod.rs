// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download supervision.
//!
//! Transfers are performed by an external agent process (aria2c by
//! default). This module launches it, tracks each transfer's lifecycle,
//! scrapes progress out of its output and lets callers pause, resume or
//! stop each transfer independently.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐ commands ┌──────────────────┐  events  ┌───────────┐
//! │ DownloadSupervisor │─────────▶│ control task     │─────────▶│ EventSink │
//! │ (cloneable handle) │◀─────────│ (owns Registry)  │          └───────────┘
//! └────────────────────┘  replies └────────▲─────────┘
//!                                          │ stdout / stderr / exit
//!                                 ┌────────┴─────────┐
//!                                 │ watcher per agent│
//!                                 └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ariaflow::download::{DownloadSupervisor, EventHub, SupervisorConfig};
//!
//! # async fn example() -> Result<(), ariaflow::DownloadError> {
//! let hub = Arc::new(EventHub::new());
//! let mut events = hub.subscribe();
//! let supervisor = DownloadSupervisor::new(SupervisorConfig::default(), hub);
//!
//! let started = supervisor.start("https://example.com/file.iso", None).await?;
//! supervisor.pause(&started.download_id).await?;
//! supervisor.resume(&started.download_id).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod events;
pub mod parser;
pub mod process;
pub mod registry;
pub mod supervisor;
pub mod types;

// Re-export commonly used items
pub use directory::{ensure_dir, prepare_destination, resolve_destination};
pub use events::{CallbackSink, DownloadEvent, EventHub, EventSink};
pub use parser::{parse_agent_output, RATE_SENTINEL, REMAINING_SENTINEL};
pub use process::{agent_command, ChildHandle, ProcessHandle, AGENT_FLAGS, DEFAULT_AGENT_BINARY};
pub use registry::Registry;
pub use supervisor::{DownloadSupervisor, SupervisorConfig};
pub use types::{
    is_magnet, DownloadId, DownloadInfo, DownloadRecord, DownloadStatus, ProgressSnapshot,
    StartedDownload,
};
