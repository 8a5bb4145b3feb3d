//! AI service message shapes
//!
//! Stream frames and status-check responses share one shape:
//! `{status, data?|controls?|results?, message?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use compliance_common::events::ExtractionStatus;

use crate::models::JobUpdate;

/// One JSON frame from the AI service (also the body of `GET /status/{jobId}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiFrame {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        rename = "controlExtractionStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub control_extraction_status: Option<String>,
}

/// Normalized meaning of a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    UploadAcknowledged,
    ExtractionStarted,
    InProgress,
    Completed(Vec<Value>),
    Failed(String),
    /// Status string with no mapping; logged and ignored
    Unknown(String),
}

impl FrameKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameKind::Completed(_) | FrameKind::Failed(_))
    }

    /// The processing-state update this frame drives, if any
    pub fn to_update(&self) -> Option<JobUpdate> {
        match self {
            FrameKind::UploadAcknowledged => Some(JobUpdate::UploadAcknowledged),
            FrameKind::ExtractionStarted => Some(JobUpdate::ExtractionStarted),
            FrameKind::InProgress => Some(JobUpdate::InProgress),
            FrameKind::Completed(items) => Some(JobUpdate::Completed {
                items: items.clone(),
            }),
            FrameKind::Failed(message) => Some(JobUpdate::Failed {
                message: message.clone(),
            }),
            FrameKind::Unknown(_) => None,
        }
    }
}

impl AiFrame {
    pub fn classify(&self) -> FrameKind {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "upload_completed" | "uploaded" => FrameKind::UploadAcknowledged,
            "started" | "extraction_started" | "control_extraction_started" => {
                FrameKind::ExtractionStarted
            }
            "processing" | "in_progress" | "in-progress" => FrameKind::InProgress,
            "completed" | "complete" | "done" | "success" => FrameKind::Completed(self.items()),
            "failed" | "error" => FrameKind::Failed(
                self.message
                    .clone()
                    .unwrap_or_else(|| "AI service reported failure".to_string()),
            ),
            other => FrameKind::Unknown(other.to_string()),
        }
    }

    /// Every processing-state update this frame drives
    ///
    /// A non-terminal frame may also carry the extraction sub-phase; it rides along as a
    /// forward-only [`JobUpdate::ExtractionReported`].
    pub fn updates(&self) -> Vec<JobUpdate> {
        let kind = self.classify();
        let Some(update) = kind.to_update() else {
            return Vec::new();
        };
        let mut updates = vec![update];

        if !kind.is_terminal() {
            if let Some(extraction) = self
                .control_extraction_status
                .as_deref()
                .and_then(|s| s.trim().to_ascii_lowercase().parse::<ExtractionStatus>().ok())
            {
                updates.push(JobUpdate::ExtractionReported(extraction));
            }
        }
        updates
    }

    /// Result items from the first of `data`, `controls`, `results` that is present
    pub fn items(&self) -> Vec<Value> {
        let payload = self
            .data
            .as_ref()
            .or(self.controls.as_ref())
            .or(self.results.as_ref());

        match payload {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => ["controls", "results", "items"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array))
                .cloned()
                .unwrap_or_else(|| vec![Value::Object(map.clone())]),
            Some(other) => vec![other.clone()],
        }
    }
}
