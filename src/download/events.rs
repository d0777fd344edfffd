// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download events and their delivery.
//!
//! The supervisor emits four kinds of events, each tagged with the download
//! id, through an [`EventSink`]. [`EventHub`] is the default sink: a single
//! subscriber slot with no replay, so a subscriber only sees events emitted
//! after it attached.

use std::sync::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::locks::{resilient_read, resilient_write};
use super::types::{DownloadId, DownloadStatus, ProgressSnapshot};

/// Notification about one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DownloadEvent {
    /// Parsed agent stdout
    Progress {
        download_id: DownloadId,
        #[serde(flatten)]
        snapshot: ProgressSnapshot,
        status: DownloadStatus,
    },
    /// Verbatim agent stderr; non-fatal
    Error {
        download_id: DownloadId,
        error: String,
    },
    /// Agent process gone; always the last event for its id
    Complete {
        download_id: DownloadId,
        status: DownloadStatus,
        exit_code: Option<i32>,
    },
    /// Caller-driven transition (pause, resume, stop)
    StatusChange {
        download_id: DownloadId,
        status: DownloadStatus,
    },
}

impl DownloadEvent {
    pub fn download_id(&self) -> &DownloadId {
        match self {
            DownloadEvent::Progress { download_id, .. }
            | DownloadEvent::Error { download_id, .. }
            | DownloadEvent::Complete { download_id, .. }
            | DownloadEvent::StatusChange { download_id, .. } => download_id,
        }
    }

    /// Short kind name, matching the serialized `event` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadEvent::Progress { .. } => "progress",
            DownloadEvent::Error { .. } => "error",
            DownloadEvent::Complete { .. } => "complete",
            DownloadEvent::StatusChange { .. } => "status-change",
        }
    }
}

/// Receiver side of supervisor events.
///
/// Called from the supervisor's control task in production order; must not
/// block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DownloadEvent);
}

/// Adapts a closure into an [`EventSink`].
pub struct CallbackSink<F>(pub F);

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(DownloadEvent) + Send + Sync,
{
    fn emit(&self, event: DownloadEvent) {
        (self.0)(event)
    }
}

/// Single-subscriber event channel.
///
/// Events emitted while nobody is subscribed are dropped. Subscribing again
/// replaces the previous subscriber.
#[derive(Debug, Default)]
pub struct EventHub {
    subscriber: RwLock<Option<mpsc::UnboundedSender<DownloadEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the (only) subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *resilient_write(&self.subscriber) = Some(tx);
        rx
    }

    pub fn has_subscriber(&self) -> bool {
        resilient_read(&self.subscriber)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

impl EventSink for EventHub {
    fn emit(&self, event: DownloadEvent) {
        let delivered = match resilient_read(&self.subscriber).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => return,
        };

        if !delivered {
            tracing::debug!("event subscriber went away, detaching");
            let mut slot = resilient_write(&self.subscriber);
            if slot.as_ref().map(|tx| tx.is_closed()).unwrap_or(false) {
                slot.take();
            }
        }
    }
}
