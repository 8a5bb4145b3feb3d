//! AI Job Bridge
//!
//! Talks to the external AI service:
//! - `upload`: multipart `POST /upload`, returns the assigned job ID
//! - `check_status`: `GET /status/{jobId}`, side-effect free
//! - `monitor`: one supervised WebSocket per job (or per comparison), relayed as typed
//!   [`BridgeEvent`]s on a channel owned by the caller
//!
//! Monitors are never reconnected. When a socket errors or closes, its entry is removed and
//! recovery is left to the reconciliation poller.

pub mod frames;
pub mod storage;

pub use frames::{AiFrame, FrameKind};
pub use storage::{DocumentStorage, FsDocumentStorage};

use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Buffered events per monitor before the socket reader waits on the consumer
const MONITOR_CHANNEL_CAPACITY: usize = 64;

/// AI service failure kinds
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    /// Connection refused, timeout, DNS
    #[error("AI service unreachable: {0}")]
    Network(String),

    /// AI service rejected the file size (HTTP 413)
    #[error("File too large for AI service: {0}")]
    PayloadTooLarge(String),

    /// AI service rejected the file type (HTTP 415)
    #[error("File type not supported by AI service: {0}")]
    UnsupportedMediaType(String),

    /// Any other non-2xx response
    #[error("AI service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body or frame was not the expected JSON
    #[error("Unparsable AI response: {0}")]
    Parse(String),

    /// Document could not be read from storage
    #[error("Document storage error: {0}")]
    Storage(String),

    /// WebSocket-level failure
    #[error("AI stream error: {0}")]
    Stream(String),
}

/// `POST /upload` response body
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub control_extraction_status: Option<String>,
}

/// What a monitor watches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorTarget {
    /// `WS /stream/{jobId}`
    Job { job_id: String },
    /// `WS /compare?user_job=..&expert_job=..`
    Comparison {
        comparison_id: Uuid,
        user_job_id: String,
        expert_job_id: String,
    },
}

impl MonitorTarget {
    /// Key in the monitor map; at most one socket per key
    pub fn key(&self) -> String {
        match self {
            MonitorTarget::Job { job_id } => job_id.clone(),
            MonitorTarget::Comparison { comparison_id, .. } => comparison_key(*comparison_id),
        }
    }

    fn url(&self, ws_base: &str) -> Result<Url, BridgeError> {
        match self {
            MonitorTarget::Job { job_id } => {
                let mut url = Url::parse(&format!("{}/stream/", ws_base))
                    .map_err(|e| BridgeError::Stream(format!("Invalid stream URL: {}", e)))?;
                url.path_segments_mut()
                    .map_err(|_| BridgeError::Stream(format!("Stream URL cannot be a base: {}", ws_base)))?
                    .pop_if_empty()
                    .push(job_id);
                Ok(url)
            }
            MonitorTarget::Comparison {
                user_job_id,
                expert_job_id,
                ..
            } => Url::parse_with_params(
                &format!("{}/compare", ws_base),
                &[("user_job", user_job_id), ("expert_job", expert_job_id)],
            )
            .map_err(|e| BridgeError::Stream(format!("Invalid stream URL: {}", e))),
        }
    }
}

/// Monitor map key for a comparison
pub fn comparison_key(comparison_id: Uuid) -> String {
    format!("compare:{}", comparison_id)
}

/// Event relayed from a monitored socket
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A parsed JSON frame
    Frame(AiFrame),
    /// Connect failure, socket error or unparsable frame; the monitor is gone
    Error(String),
    /// The AI side closed the socket; the monitor is gone
    Closed { code: Option<u16>, reason: String },
}

struct MonitorHandle {
    monitor_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type MonitorMap = Arc<Mutex<HashMap<String, MonitorHandle>>>;

/// Client for the external AI service plus the registry of live monitors
pub struct AiJobBridge {
    http: Client,
    base_url: String,
    ws_url: String,
    storage: Arc<dyn DocumentStorage>,
    monitors: MonitorMap,
}

impl AiJobBridge {
    pub fn new(
        base_url: &str,
        ws_url: &str,
        http_timeout: Duration,
        storage: Arc<dyn DocumentStorage>,
    ) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| BridgeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ws_url: ws_url.trim_end_matches('/').to_string(),
            storage,
            monitors: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Send a stored document to the AI service
    pub async fn upload(&self, file_path: &str, file_name: &str) -> Result<UploadResponse, BridgeError> {
        let bytes = self.storage.read(file_path).await?;
        let size = bytes.len();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(file_name, size, "Uploading document to AI service");

        let response = self
            .http
            .post(self.endpoint(&["upload"])?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::PAYLOAD_TOO_LARGE => BridgeError::PayloadTooLarge(body),
                StatusCode::UNSUPPORTED_MEDIA_TYPE => BridgeError::UnsupportedMediaType(body),
                _ => BridgeError::Http {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Parse(e.to_string()))?;

        info!(job_id = %upload.job_id, file_name, "AI service accepted upload");
        Ok(upload)
    }

    /// Current status of a job, straight from the AI service
    pub async fn check_status(&self, job_id: &str) -> Result<AiFrame, BridgeError> {
        let response = self
            .http
            .get(self.endpoint(&["status", job_id])?)
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BridgeError::Parse(e.to_string()))
    }

    // Job IDs are opaque; each segment is percent-encoded so `#`, `?` or `/` stay inside it.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, BridgeError> {
        let mut url = Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| BridgeError::Network(format!("Invalid AI service URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BridgeError::Network(format!("AI service URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Start supervising a socket for `target`
    ///
    /// Returns `Ok(None)` when a monitor for the same key is already running; the existing
    /// consumer keeps receiving its events and no second socket is opened.
    pub async fn monitor(
        &self,
        target: MonitorTarget,
    ) -> Result<Option<mpsc::Receiver<BridgeEvent>>, BridgeError> {
        let key = target.key();
        let url = target.url(&self.ws_url)?;

        let mut monitors = self.monitors.lock().await;
        if monitors.contains_key(&key) {
            debug!(key = %key, "Monitor already running");
            return Ok(None);
        }

        let (tx, rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
        let monitor_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_monitor(
            url,
            key.clone(),
            monitor_id,
            cancel.clone(),
            tx,
            Arc::clone(&self.monitors),
        ));

        monitors.insert(
            key.clone(),
            MonitorHandle {
                monitor_id,
                cancel,
                task,
            },
        );
        info!(key = %key, "Monitor started");

        Ok(Some(rx))
    }

    pub async fn is_monitored(&self, key: &str) -> bool {
        self.monitors.lock().await.contains_key(key)
    }

    pub async fn monitor_count(&self) -> usize {
        self.monitors.lock().await.len()
    }

    /// Close every monitored socket, waiting at most `timeout` for them to finish
    pub async fn close_all(&self, timeout: Duration) {
        let handles: Vec<MonitorHandle> = {
            let mut monitors = self.monitors.lock().await;
            monitors.drain().map(|(_, handle)| handle).collect()
        };

        if handles.is_empty() {
            return;
        }

        let count = handles.len();
        info!(count, "Closing AI monitors");

        let tasks: Vec<JoinHandle<()>> = handles
            .into_iter()
            .map(|handle| {
                handle.cancel.cancel();
                handle.task
            })
            .collect();

        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(count, "Timed out waiting for AI monitors to close");
        }
    }
}

/// Socket reader for one monitor
async fn run_monitor(
    url: Url,
    key: String,
    monitor_id: Uuid,
    cancel: CancellationToken,
    tx: mpsc::Sender<BridgeEvent>,
    monitors: MonitorMap,
) {
    let connect = tokio::select! {
        _ = cancel.cancelled() => {
            forget(&monitors, &key, monitor_id).await;
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let mut ws = match connect {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(key = %key, error = %e, "AI stream connect failed");
            forget(&monitors, &key, monitor_id).await;
            let _ = tx.send(BridgeEvent::Error(format!("Connect failed: {}", e))).await;
            return;
        }
    };

    debug!(key = %key, "AI stream connected");

    let final_event = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                break None;
            }
            message = ws.next() => message,
        };

        let payload = match message {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                    None => (None, String::new()),
                };
                break Some(BridgeEvent::Closed { code, reason });
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Some(BridgeEvent::Error(e.to_string())),
            None => {
                break Some(BridgeEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                })
            }
        };

        let frame: AiFrame = match serde_json::from_slice(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = ws.close(None).await;
                break Some(BridgeEvent::Error(
                    BridgeError::Parse(e.to_string()).to_string(),
                ));
            }
        };

        let terminal = frame.classify().is_terminal();
        if tx.send(BridgeEvent::Frame(frame)).await.is_err() {
            debug!(key = %key, "Monitor consumer dropped");
            let _ = ws.close(None).await;
            break None;
        }
        if terminal {
            let _ = ws.close(None).await;
            break None;
        }
    };

    forget(&monitors, &key, monitor_id).await;

    if let Some(event) = final_event {
        debug!(key = %key, event = ?event, "AI stream ended");
        let _ = tx.send(event).await;
    }
}

// Remove our own entry; a newer monitor under the same key is left alone.
async fn forget(monitors: &MonitorMap, key: &str, monitor_id: Uuid) {
    let mut monitors = monitors.lock().await;
    if monitors
        .get(key)
        .is_some_and(|handle| handle.monitor_id == monitor_id)
    {
        monitors.remove(key);
    }
}
