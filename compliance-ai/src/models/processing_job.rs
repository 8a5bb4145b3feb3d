//! Processing state machine
//!
//! One [`ProcessingJob`] is embedded in every framework document record and tracks a single
//! AI job through two parallel status fields:
//!
//! ```text
//! status:                   pending → uploaded → processing → completed | failed
//! controlExtractionStatus:  pending → started  → processing → completed | failed
//! ```
//!
//! Either field may be the one that moves on a given event. Terminal values are reached by
//! both fields together and never regress; applying an update to a terminal job is a no-op.
//! The only way out of `failed` is a fresh upload ([`ProcessingJob::record_upload`]).

use chrono::{DateTime, Utc};
use compliance_common::events::{ExtractionStatus, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted status and results of one AI job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    /// Opaque job identifier assigned by the AI service on upload
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub control_extraction_status: ExtractionStatus,
    /// Time of the last status write
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Analysis results; empty until the job completes
    pub extracted_items: Vec<Value>,
    pub item_count: i64,
    pub extracted_at: Option<DateTime<Utc>>,
}

/// An event observed for a job, from the live stream or from a status check
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// AI service confirmed it received the whole upload
    UploadAcknowledged,
    /// Control extraction began
    ExtractionStarted,
    /// Work in progress
    InProgress,
    /// Sub-phase the AI service reported alongside a non-terminal status; forward only
    ExtractionReported(ExtractionStatus),
    /// Results are ready
    Completed { items: Vec<Value> },
    /// Job failed; the message is passed through as-is
    Failed { message: String },
}

/// Outcome of applying a [`JobUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed; nothing to persist or announce
    Unchanged,
    /// A non-terminal field moved forward
    Advanced,
    /// Job reached `completed`
    Completed,
    /// Job reached `failed`
    Failed,
}

impl Transition {
    pub fn is_change(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Completed | Transition::Failed)
    }
}

impl Default for ProcessingJob {
    fn default() -> Self {
        Self {
            job_id: None,
            status: JobStatus::Pending,
            control_extraction_status: ExtractionStatus::Pending,
            processed_at: None,
            error_message: None,
            extracted_items: Vec::new(),
            item_count: 0,
            extracted_at: None,
        }
    }
}

impl ProcessingJob {
    /// A new upload is allowed when no job was ever started, or the last one failed
    pub fn can_upload(&self) -> bool {
        self.job_id.is_none() || self.status == JobStatus::Failed
    }

    /// Reset to `uploaded` for a freshly assigned AI job
    pub fn record_upload(
        &mut self,
        job_id: String,
        extraction: ExtractionStatus,
        now: DateTime<Utc>,
    ) {
        self.job_id = Some(job_id);
        self.status = JobStatus::Uploaded;
        self.control_extraction_status = if extraction.is_terminal() {
            ExtractionStatus::Pending
        } else {
            extraction
        };
        self.processed_at = Some(now);
        self.error_message = None;
        self.extracted_items = Vec::new();
        self.item_count = 0;
        self.extracted_at = None;
    }

    /// Apply an update in place
    ///
    /// Idempotent: re-applying a completion (with the same or different items) to a job that
    /// is already terminal leaves it untouched and returns [`Transition::Unchanged`].
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Transition {
        if self.status.is_terminal() {
            return Transition::Unchanged;
        }

        let transition = match update {
            JobUpdate::UploadAcknowledged => {
                if self.advance_status_to_processing() {
                    Transition::Advanced
                } else {
                    Transition::Unchanged
                }
            }
            JobUpdate::ExtractionStarted => {
                if self.advance_extraction(ExtractionStatus::Started) {
                    Transition::Advanced
                } else {
                    Transition::Unchanged
                }
            }
            JobUpdate::InProgress => {
                let status_moved = self.advance_status_to_processing();
                let extraction_moved = self.advance_extraction(ExtractionStatus::Processing);
                if status_moved || extraction_moved {
                    Transition::Advanced
                } else {
                    Transition::Unchanged
                }
            }
            JobUpdate::ExtractionReported(reported) => {
                if !reported.is_terminal() && self.advance_extraction(*reported) {
                    Transition::Advanced
                } else {
                    Transition::Unchanged
                }
            }
            JobUpdate::Completed { items } => {
                self.status = JobStatus::Completed;
                self.control_extraction_status = ExtractionStatus::Completed;
                self.extracted_items = items.clone();
                self.item_count = items.len() as i64;
                self.extracted_at = Some(now);
                self.error_message = None;
                Transition::Completed
            }
            JobUpdate::Failed { message } => {
                self.status = JobStatus::Failed;
                self.control_extraction_status = ExtractionStatus::Failed;
                self.error_message = Some(message.clone());
                Transition::Failed
            }
        };

        if transition.is_change() {
            self.processed_at = Some(now);
        }
        transition
    }

    /// Apply several updates observed together, e.g. from one frame
    ///
    /// Returns the most significant transition: terminal over advanced over unchanged.
    pub fn apply_all(&mut self, updates: &[JobUpdate], now: DateTime<Utc>) -> Transition {
        updates
            .iter()
            .map(|update| self.apply(update, now))
            .fold(Transition::Unchanged, |acc, next| match (acc, next) {
                (acc, _) if acc.is_terminal() => acc,
                (_, next) if next.is_change() => next,
                (acc, _) => acc,
            })
    }

    fn advance_status_to_processing(&mut self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Uploaded => {
                self.status = JobStatus::Processing;
                true
            }
            _ => false,
        }
    }

    // Extraction only moves forward through pending < started < processing.
    fn advance_extraction(&mut self, target: ExtractionStatus) -> bool {
        if self.control_extraction_status < target {
            self.control_extraction_status = target;
            true
        } else {
            false
        }
    }
}
