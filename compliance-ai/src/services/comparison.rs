//! Comparison orchestration
//!
//! A comparison pairs one of the user's completed frameworks with a completed expert
//! framework. The AI service streams the comparison over one monitored socket carrying both
//! job IDs; on completion the results are stored on the comparison and a summary is appended
//! to the user's framework record in the same transaction.

use chrono::Utc;
use compliance_common::events::{ComparisonStatus, JobStatus, Notification, SubjectKind};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{comparison_key, AiJobBridge, BridgeEvent, FrameKind, MonitorTarget};
use crate::db::comparisons;
use crate::error::{ApiError, ApiResult};
use crate::models::{mean_score, ComparisonJob, ComparisonSummary, Framework};
use crate::services::processing::load_owned;
use crate::services::registry::{Relay, RelayHub};

/// Error text for comparisons whose monitor disappeared
pub const MONITOR_LOST: &str = "comparison monitor lost";

#[derive(Clone)]
pub struct ComparisonService {
    db: SqlitePool,
    bridge: Arc<AiJobBridge>,
    hub: RelayHub,
    score_field: Arc<str>,
    /// Comparisons whose relay task has not yet returned
    relays: Arc<Mutex<HashSet<Uuid>>>,
}

impl ComparisonService {
    pub fn new(db: SqlitePool, bridge: Arc<AiJobBridge>, hub: RelayHub, score_field: &str) -> Self {
        Self {
            db,
            bridge,
            hub,
            score_field: Arc::from(score_field),
            relays: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create a comparison and start monitoring it
    ///
    /// Both frameworks must have completed processing; otherwise nothing is written.
    pub async fn start(
        &self,
        user_id: &str,
        user_framework_id: Uuid,
        expert_framework_id: Uuid,
    ) -> ApiResult<ComparisonJob> {
        let user_framework = load_owned(&self.db, user_id, user_framework_id).await?;
        if user_framework.kind != SubjectKind::User {
            return Err(ApiError::BadRequest(format!(
                "Framework {} is not a user framework",
                user_framework_id
            )));
        }

        let expert_framework = crate::db::frameworks::load(&self.db, expert_framework_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Framework {}", expert_framework_id)))?;
        if expert_framework.kind != SubjectKind::Expert {
            return Err(ApiError::BadRequest(format!(
                "Framework {} is not an expert framework",
                expert_framework_id
            )));
        }

        let user_job_id = completed_job_id(&user_framework)?;
        let expert_job_id = completed_job_id(&expert_framework)?;

        if let Some(active) =
            comparisons::find_active(&self.db, user_id, user_framework_id, expert_framework_id)
                .await?
        {
            return Err(ApiError::Conflict(format!(
                "Comparison {} for these frameworks is already {}",
                active.id, active.status
            )));
        }

        let mut job = ComparisonJob::new(
            user_id.to_string(),
            user_framework_id,
            expert_framework_id,
            user_job_id,
            expert_job_id,
        );
        comparisons::insert(&self.db, &job).await?;

        let target = MonitorTarget::Comparison {
            comparison_id: job.id,
            user_job_id: job.user_job_id.clone(),
            expert_job_id: job.expert_job_id.clone(),
        };
        let events = match self.bridge.monitor(target).await {
            Ok(events) => events,
            Err(e) => {
                self.fail(&job, &e.to_string()).await;
                return Err(ApiError::from(e));
            }
        };

        if comparisons::mark_in_process(&self.db, job.id).await? {
            job.status = ComparisonStatus::InProcess;
        }

        info!(
            comparison_id = %job.id,
            user_job = %job.user_job_id,
            expert_job = %job.expert_job_id,
            "Comparison started"
        );
        self.notify_progress(&job, "Comparison started").await;

        if let Some(events) = events {
            self.spawn_relay(job.clone(), events).await;
        }

        Ok(job)
    }

    /// Load a comparison the caller owns
    pub async fn get(&self, user_id: &str, comparison_id: Uuid) -> ApiResult<ComparisonJob> {
        let job = comparisons::load(&self.db, comparison_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Comparison {}", comparison_id)))?;

        if job.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "Comparison {} belongs to another user",
                comparison_id
            )));
        }
        Ok(job)
    }

    /// User acknowledgment: `completed` → `done`
    pub async fn mark_done(&self, user_id: &str, comparison_id: Uuid) -> ApiResult<ComparisonJob> {
        let job = self.get(user_id, comparison_id).await?;

        if !comparisons::mark_done(&self.db, comparison_id).await? {
            return Err(ApiError::Conflict(format!(
                "Comparison {} is {}, not completed",
                comparison_id, job.status
            )));
        }

        self.get(user_id, comparison_id).await
    }

    /// Fail an active comparison the bridge is no longer monitoring
    ///
    /// Returns false when a monitor is still live, its relay still has events to handle, or
    /// the comparison already finished.
    pub async fn fail_if_unmonitored(&self, comparison_id: Uuid) -> ApiResult<bool> {
        // The bridge forgets a monitor once the terminal frame is queued, before the relay
        // has stored it.
        if self.relays.lock().await.contains(&comparison_id) {
            return Ok(false);
        }
        if self.bridge.is_monitored(&comparison_key(comparison_id)).await {
            return Ok(false);
        }

        let Some(job) = comparisons::load(&self.db, comparison_id).await? else {
            return Ok(false);
        };
        if !job.status.is_active() {
            return Ok(false);
        }

        Ok(self.fail(&job, MONITOR_LOST).await)
    }

    // The relay marker is set before the task starts and cleared only after it returns.
    async fn spawn_relay(&self, job: ComparisonJob, events: mpsc::Receiver<BridgeEvent>) {
        self.relays.lock().await.insert(job.id);
        let service = self.clone();
        tokio::spawn(async move {
            let comparison_id = job.id;
            service.relay(job, events).await;
            service.relays.lock().await.remove(&comparison_id);
        });
    }

    async fn relay(&self, job: ComparisonJob, mut events: mpsc::Receiver<BridgeEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::Frame(frame) => match frame.classify() {
                    FrameKind::Completed(items) => {
                        self.complete(&job, items).await;
                        return;
                    }
                    FrameKind::Failed(message) => {
                        self.fail(&job, &message).await;
                        return;
                    }
                    FrameKind::Unknown(status) => {
                        debug!(comparison_id = %job.id, status = %status, "Ignoring unknown AI status");
                    }
                    _ => self.notify_progress(&job, "Comparison in progress").await,
                },
                BridgeEvent::Error(message) => {
                    self.fail(&job, &message).await;
                    return;
                }
                BridgeEvent::Closed { code, reason } => {
                    let message = match code {
                        Some(code) => format!("AI stream closed before completion ({}): {}", code, reason),
                        None => format!("AI stream closed before completion: {}", reason),
                    };
                    self.fail(&job, &message).await;
                    return;
                }
            }
        }
        debug!(comparison_id = %job.id, "Comparison monitor stopped");
    }

    async fn complete(&self, job: &ComparisonJob, results: Vec<Value>) {
        let mean = mean_score(&results, &self.score_field);
        let summary = ComparisonSummary {
            comparison_id: job.id,
            expert_framework_id: job.expert_framework_id,
            results_count: results.len() as i64,
            mean_score: mean,
            results: results.clone(),
            completed_at: Utc::now(),
        };

        match comparisons::complete_with_fan_out(
            &self.db,
            job.id,
            job.user_framework_id,
            &results,
            mean,
            &summary,
        )
        .await
        {
            Ok(true) => {
                info!(
                    comparison_id = %job.id,
                    results_count = summary.results_count,
                    mean_score = ?mean,
                    "Comparison completed"
                );
                let notification = Notification::ComparisonUpdate {
                    comparison_id: job.id,
                    status: ComparisonStatus::Completed,
                    message: "Comparison completed".to_string(),
                    results_count: Some(summary.results_count),
                    mean_score: mean,
                    results: Some(results),
                    error_message: None,
                };
                self.hub
                    .deliver(Relay::Comparisons, &job.user_id, &notification)
                    .await;
            }
            Ok(false) => debug!(comparison_id = %job.id, "Comparison already finished"),
            Err(e) => warn!(comparison_id = %job.id, error = %e, "Failed to store comparison results"),
        }
    }

    // Returns true if this call moved the comparison to `error`.
    async fn fail(&self, job: &ComparisonJob, message: &str) -> bool {
        match comparisons::mark_error(&self.db, job.id, message).await {
            Ok(true) => {
                warn!(comparison_id = %job.id, error = message, "Comparison failed");
                let notification = Notification::ComparisonUpdate {
                    comparison_id: job.id,
                    status: ComparisonStatus::Error,
                    message: "Comparison failed".to_string(),
                    results_count: None,
                    mean_score: None,
                    results: None,
                    error_message: Some(message.to_string()),
                };
                self.hub
                    .deliver(Relay::Comparisons, &job.user_id, &notification)
                    .await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(comparison_id = %job.id, error = %e, "Failed to record comparison error");
                false
            }
        }
    }

    async fn notify_progress(&self, job: &ComparisonJob, message: &str) {
        let notification = Notification::ComparisonUpdate {
            comparison_id: job.id,
            status: ComparisonStatus::InProcess,
            message: message.to_string(),
            results_count: None,
            mean_score: None,
            results: None,
            error_message: None,
        };
        self.hub
            .deliver(Relay::Comparisons, &job.user_id, &notification)
            .await;
    }
}

fn completed_job_id(framework: &Framework) -> ApiResult<String> {
    match (&framework.job.job_id, framework.job.status) {
        (Some(job_id), JobStatus::Completed) => Ok(job_id.clone()),
        (_, status) => Err(ApiError::BadRequest(format!(
            "Framework {} has not completed processing (status: {})",
            framework.id, status
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AiFrame, FsDocumentStorage};
    use crate::db::frameworks;
    use crate::models::JobUpdate;
    use crate::services::{ProcessingService, ReconciliationPoller};
    use compliance_common::events::ExtractionStatus;
    use compliance_common::time;
    use serde_json::json;
    use std::time::Duration;

    fn framework(status_update: Option<JobUpdate>) -> Framework {
        let mut framework = Framework::new(
            "alice".to_string(),
            SubjectKind::User,
            "iso.pdf".to_string(),
            "alice/iso.pdf".to_string(),
        );
        framework
            .job
            .record_upload("abc".to_string(), ExtractionStatus::Pending, Utc::now());
        if let Some(update) = status_update {
            framework.job.apply(&update, Utc::now());
        }
        framework
    }

    #[test]
    fn test_completed_job_id_requires_completion() {
        let done = framework(Some(JobUpdate::Completed { items: vec![] }));
        assert_eq!(completed_job_id(&done).unwrap(), "abc");

        let running = framework(Some(JobUpdate::InProgress));
        assert!(matches!(completed_job_id(&running), Err(ApiError::BadRequest(_))));

        let failed = framework(Some(JobUpdate::Failed { message: "x".to_string() }));
        assert!(completed_job_id(&failed).is_err());
    }

    async fn completed_framework(db: &SqlitePool, kind: SubjectKind, job_id: &str) -> Framework {
        let mut framework = Framework::new(
            "alice".to_string(),
            kind,
            "framework.pdf".to_string(),
            "alice/framework.pdf".to_string(),
        );
        framework
            .job
            .record_upload(job_id.to_string(), ExtractionStatus::Pending, Utc::now());
        framework
            .job
            .apply(&JobUpdate::Completed { items: vec![json!({"id": 1})] }, Utc::now());
        frameworks::insert(db, &framework).await.unwrap();
        framework
    }

    #[tokio::test]
    async fn test_sweep_spares_comparison_with_pending_terminal_frame() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = crate::db::init_database_pool(&temp_dir.path().join("compliance.db"))
            .await
            .unwrap();

        // Nothing listens on port 9, so the bridge holds no monitor for the comparison
        let bridge = Arc::new(
            AiJobBridge::new(
                "http://127.0.0.1:9",
                "ws://127.0.0.1:9",
                Duration::from_secs(1),
                Arc::new(FsDocumentStorage::new(temp_dir.path())),
            )
            .unwrap(),
        );
        let hub = RelayHub::default();
        let processing = ProcessingService::new(db.clone(), Arc::clone(&bridge), hub.clone());
        let service = ComparisonService::new(db.clone(), Arc::clone(&bridge), hub, "score");
        let poller = ReconciliationPoller::new(
            db.clone(),
            processing,
            service.clone(),
            Duration::from_secs(30),
            Duration::from_secs(300),
        );

        let user = completed_framework(&db, SubjectKind::User, "u1").await;
        let expert = completed_framework(&db, SubjectKind::Expert, "e1").await;
        let mut job = ComparisonJob::new(
            "alice".to_string(),
            user.id,
            expert.id,
            "u1".to_string(),
            "e1".to_string(),
        );
        job.status = ComparisonStatus::InProcess;
        comparisons::insert(&db, &job).await.unwrap();
        sqlx::query("UPDATE comparisons SET updated_at = ? WHERE id = ?")
            .bind(time::to_db(Utc::now() - chrono::Duration::minutes(10)))
            .bind(job.id.to_string())
            .execute(&db)
            .await
            .unwrap();

        // Monitor already gone, relay alive with the terminal frame still to come
        let (tx, events) = mpsc::channel(4);
        service.spawn_relay(job.clone(), events).await;
        assert!(!bridge.is_monitored(&comparison_key(job.id)).await);

        let summary = poller.tick().await;
        assert_eq!(summary.comparisons_failed, 0);
        assert_eq!(
            comparisons::load(&db, job.id).await.unwrap().unwrap().status,
            ComparisonStatus::InProcess
        );

        let completed: AiFrame =
            serde_json::from_value(json!({"status": "completed", "results": [{"score": 0.5}]}))
                .unwrap();
        tx.send(BridgeEvent::Frame(completed)).await.unwrap();
        drop(tx);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = comparisons::load(&db, job.id).await.unwrap().unwrap();
            if stored.status == ComparisonStatus::Completed {
                assert_eq!(stored.results_count, 1);
                assert_eq!(stored.mean_score, Some(0.5));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "comparison never completed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let user_record = frameworks::load(&db, user.id).await.unwrap().unwrap();
        assert_eq!(user_record.comparison_results.len(), 1);
        assert_eq!(user_record.comparison_results[0].comparison_id, job.id);

        // Once the relay has returned, a later sweep has nothing to fail
        assert!(!service.fail_if_unmonitored(job.id).await.unwrap());
    }
}
