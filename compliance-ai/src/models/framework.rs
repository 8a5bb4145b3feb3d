//! Framework document record
//!
//! The document itself lives with the storage collaborator; this record carries the owner,
//! the storage path, the embedded [`ProcessingJob`] and the denormalized comparison summaries.

use chrono::{DateTime, Utc};
use compliance_common::events::SubjectKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::comparison_job::ComparisonSummary;
use super::processing_job::ProcessingJob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Framework {
    pub id: Uuid,
    pub user_id: String,
    pub kind: SubjectKind,
    pub file_name: String,
    pub file_path: String,
    #[serde(flatten)]
    pub job: ProcessingJob,
    /// Completed comparisons against this framework, appended on comparison completion
    pub comparison_results: Vec<ComparisonSummary>,
    pub created_at: DateTime<Utc>,
}

impl Framework {
    pub fn new(user_id: String, kind: SubjectKind, file_name: String, file_path: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            file_name,
            file_path,
            job: ProcessingJob::default(),
            comparison_results: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
