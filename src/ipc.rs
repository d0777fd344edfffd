// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-lines front end for UI processes.
//!
//! One request per input line:
//!
//! ```text
//! {"requestId": 1, "op": "start", "url": "https://example.com/a.iso", "folder": "/tmp"}
//! {"requestId": 2, "op": "pause", "downloadId": "1718000000000-0"}
//! ```
//!
//! Replies and events go to the output, one JSON object per line:
//!
//! ```text
//! {"type":"response","requestId":1,"downloadId":"1718000000000-0","folder":"/tmp"}
//! {"type":"response","requestId":2,"success":true}
//! {"type":"event","event":"status-change","downloadId":"1718000000000-0","status":"paused"}
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::download::{DownloadEvent, DownloadId, DownloadInfo, DownloadSupervisor, StartedDownload};
use crate::error::{DownloadError, ErrorResponse};

/// An operation on the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Start {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        folder: Option<String>,
    },
    Pause { download_id: DownloadId },
    Resume { download_id: DownloadId },
    Stop { download_id: DownloadId },
    List,
}

/// A request plus the caller's correlation id, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(default)]
    pub request_id: Option<Value>,
    #[serde(flatten)]
    pub request: Request,
}

/// Reply payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Started(StartedDownload),
    Success { success: bool },
    Listing { downloads: Vec<DownloadInfo> },
    Error(ErrorResponse),
}

impl Reply {
    fn ok() -> Self {
        Reply::Success { success: true }
    }

    fn from_result<T>(result: Result<T, DownloadError>, wrap: impl FnOnce(T) -> Reply) -> Self {
        match result {
            Ok(value) => wrap(value),
            Err(e) => Reply::Error(ErrorResponse::from(&e)),
        }
    }
}

/// One output line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound<'a> {
    Response {
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<Value>,
        #[serde(flatten)]
        reply: Reply,
    },
    Event {
        #[serde(flatten)]
        event: &'a DownloadEvent,
    },
}

/// Execute one request against the supervisor.
pub async fn dispatch(supervisor: &DownloadSupervisor, request: Request) -> Reply {
    match request {
        Request::Start { url, folder } => {
            let url = url.unwrap_or_default();
            Reply::from_result(supervisor.start(&url, folder.as_deref()).await, Reply::Started)
        }
        Request::Pause { download_id } => {
            Reply::from_result(supervisor.pause(&download_id).await, |_| Reply::ok())
        }
        Request::Resume { download_id } => {
            Reply::from_result(supervisor.resume(&download_id).await, |_| Reply::ok())
        }
        Request::Stop { download_id } => {
            Reply::from_result(supervisor.stop(&download_id).await, |_| Reply::ok())
        }
        Request::List => Reply::from_result(supervisor.list().await, |downloads| {
            Reply::Listing { downloads }
        }),
    }
}

/// Parse and execute one input line.
pub async fn handle_line(supervisor: &DownloadSupervisor, line: &str) -> (Option<Value>, Reply) {
    match serde_json::from_str::<RequestEnvelope>(line) {
        Ok(envelope) => (envelope.request_id, dispatch(supervisor, envelope.request).await),
        Err(e) => {
            tracing::warn!(error = %e, "malformed request");
            let reply = Reply::Error(ErrorResponse {
                error: format!("Malformed request: {}", e),
                kind: "invalid_request",
            });
            (None, reply)
        }
    }
}

async fn write_line<W>(output: &mut W, message: &Outbound<'_>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Serve requests from `input` until EOF, interleaving events on `output`.
pub async fn serve<R, W>(
    supervisor: &DownloadSupervisor,
    mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let (request_id, reply) = handle_line(supervisor, &line).await;
                    write_line(&mut output, &Outbound::Response { request_id, reply }).await?;
                }
                None => break,
            },
            Some(event) = events.recv() => {
                write_line(&mut output, &Outbound::Event { event: &event }).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadStatus;
    use std::path::PathBuf;

    #[test]
    fn test_parse_start_request() {
        let envelope: RequestEnvelope = serde_json::from_str(
            r#"{"requestId": 7, "op": "start", "url": "magnet:?xt=urn:btih:abc", "folder": "/tmp/x"}"#,
        )
        .unwrap();

        assert_eq!(envelope.request_id, Some(Value::from(7)));
        assert_eq!(
            envelope.request,
            Request::Start {
                url: Some("magnet:?xt=urn:btih:abc".to_string()),
                folder: Some("/tmp/x".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_control_requests() {
        let envelope: RequestEnvelope =
            serde_json::from_str(r#"{"op": "stop", "downloadId": "1-0"}"#).unwrap();
        assert_eq!(envelope.request_id, None);
        assert_eq!(envelope.request, Request::Stop { download_id: DownloadId::from("1-0") });

        let envelope: RequestEnvelope = serde_json::from_str(r#"{"op": "list"}"#).unwrap();
        assert_eq!(envelope.request, Request::List);
    }

    #[test]
    fn test_start_without_url_parses() {
        let envelope: RequestEnvelope = serde_json::from_str(r#"{"op": "start"}"#).unwrap();
        assert_eq!(envelope.request, Request::Start { url: None, folder: None });
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert!(serde_json::from_str::<RequestEnvelope>(r#"{"op": "explode"}"#).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let started = Outbound::Response {
            request_id: Some(Value::from("a")),
            reply: Reply::Started(StartedDownload {
                download_id: DownloadId::from("5-0"),
                folder: PathBuf::from("/tmp"),
            }),
        };
        let value = serde_json::to_value(&started).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["requestId"], "a");
        assert_eq!(value["downloadId"], "5-0");
        assert_eq!(value["folder"], "/tmp");

        let ok = Outbound::Response { request_id: None, reply: Reply::ok() };
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("requestId").is_none());

        let err = Outbound::Response {
            request_id: None,
            reply: Reply::Error(ErrorResponse::from(&DownloadError::not_found(&DownloadId::from("x")))),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["error"], "Download not found");
        assert_eq!(value["kind"], "not_found");
    }

    #[test]
    fn test_event_wire_format() {
        let event = DownloadEvent::StatusChange {
            download_id: DownloadId::from("5-0"),
            status: DownloadStatus::Paused,
        };
        let value = serde_json::to_value(Outbound::Event { event: &event }).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"], "status-change");
        assert_eq!(value["downloadId"], "5-0");
        assert_eq!(value["status"], "paused");
    }
}
