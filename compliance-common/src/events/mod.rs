//! Notification frame types
//!
//! Every frame the relay sockets send to browser sessions is one variant of [`Notification`].
//! Frames are JSON objects tagged by `type` with camelCase fields.

mod status_types;

pub use status_types::{ComparisonStatus, ExtractionStatus, JobStatus, SubjectKind, UnknownStatus};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Server → client notification frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    /// Handshake acknowledgment, sent once right after a socket is accepted
    Connection { status: String },

    /// Processing state of a framework document changed
    FrameworkUpdate {
        framework_id: Uuid,
        subject_kind: SubjectKind,
        status: JobStatus,
        control_extraction_status: ExtractionStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_count: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extracted_items: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// Comparison job changed
    ComparisonUpdate {
        comparison_id: Uuid,
        status: ComparisonStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results_count: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mean_score: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl Notification {
    /// The acknowledgment every accepted socket receives first
    pub fn connected() -> Self {
        Notification::Connection {
            status: "connected".to_string(),
        }
    }

    /// Frame type name, as serialized in the `type` field
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::Connection { .. } => "connection",
            Notification::FrameworkUpdate { .. } => "framework_update",
            Notification::ComparisonUpdate { .. } => "comparison_update",
        }
    }

    /// Serialize to the JSON text written on the wire
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
