//! Comparison job
//!
//! Derived analysis of one user-owned and one expert-owned framework, both of which must have
//! completed processing before the comparison is created.

use chrono::{DateTime, Utc};
use compliance_common::events::ComparisonStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonJob {
    pub id: Uuid,
    pub user_id: String,
    pub user_framework_id: Uuid,
    pub expert_framework_id: Uuid,
    pub user_job_id: String,
    pub expert_job_id: String,
    pub status: ComparisonStatus,
    pub results: Vec<Value>,
    pub results_count: i64,
    pub mean_score: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComparisonJob {
    pub fn new(
        user_id: String,
        user_framework_id: Uuid,
        expert_framework_id: Uuid,
        user_job_id: String,
        expert_job_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_framework_id,
            expert_framework_id,
            user_job_id,
            expert_job_id,
            status: ComparisonStatus::Pending,
            results: Vec::new(),
            results_count: 0,
            mean_score: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Copy of a completed comparison, appended to the user's framework record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub comparison_id: Uuid,
    pub expert_framework_id: Uuid,
    pub results_count: i64,
    pub mean_score: Option<f64>,
    pub results: Vec<Value>,
    pub completed_at: DateTime<Utc>,
}

/// Mean of a numeric per-item field
///
/// Items whose field is missing or non-numeric are left out of the average.
/// Returns `None` when no item carries a score.
pub fn mean_score(items: &[Value], field: &str) -> Option<f64> {
    let scores: Vec<f64> = items
        .iter()
        .filter_map(|item| item.get(field))
        .filter_map(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .collect();

    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}
