//! Status type definitions
//!
//! Supporting enums for the processing and comparison state machines. Each one serializes
//! to the lowercase string stored in the database and carried in notification frames.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which side of a comparison a document belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// Framework uploaded by an end user
    User,
    /// Reference framework curated by an expert
    Expert,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Expert => "expert",
        }
    }
}

/// Overall lifecycle of one AI job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Document registered, nothing sent to the AI service yet
    Pending,
    /// AI service accepted the file and assigned a job ID
    Uploaded,
    /// AI service reported progress
    Processing,
    /// Results attached (terminal)
    Completed,
    /// Error message attached (terminal; re-upload permitted)
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Finer-grained control extraction sub-phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Started,
    Processing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Started => "started",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionStatus::Completed | ExtractionStatus::Failed)
    }
}

/// Lifecycle of a comparison job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonStatus {
    Pending,
    InProcess,
    Completed,
    Error,
    /// Completed results acknowledged by the user
    Done,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Pending => "pending",
            ComparisonStatus::InProcess => "in-process",
            ComparisonStatus::Completed => "completed",
            ComparisonStatus::Error => "error",
            ComparisonStatus::Done => "done",
        }
    }

    /// Pending and in-process comparisons block a new start for the same pair
    pub fn is_active(&self) -> bool {
        matches!(self, ComparisonStatus::Pending | ComparisonStatus::InProcess)
    }
}

/// Unrecognized status string read back from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status value: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

macro_rules! status_str_impls {
    ($ty:ty, [$($variant:expr),+ $(,)?]) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| UnknownStatus(s.to_string()))
            }
        }
    };
}

status_str_impls!(SubjectKind, [SubjectKind::User, SubjectKind::Expert]);
status_str_impls!(
    JobStatus,
    [
        JobStatus::Pending,
        JobStatus::Uploaded,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ]
);
status_str_impls!(
    ExtractionStatus,
    [
        ExtractionStatus::Pending,
        ExtractionStatus::Started,
        ExtractionStatus::Processing,
        ExtractionStatus::Completed,
        ExtractionStatus::Failed,
    ]
);
status_str_impls!(
    ComparisonStatus,
    [
        ComparisonStatus::Pending,
        ComparisonStatus::InProcess,
        ComparisonStatus::Completed,
        ComparisonStatus::Error,
        ComparisonStatus::Done,
    ]
);
