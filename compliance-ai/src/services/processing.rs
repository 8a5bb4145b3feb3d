//! Processing orchestration for framework documents
//!
//! One implementation serves both subject kinds; the kind only selects which relay the
//! owner's notifications go to.
//!
//! Live stream and reconciliation both funnel through [`ProcessingService::apply`], which
//! persists with a guarded write and notifies only when that write won.

use chrono::Utc;
use compliance_common::events::{ExtractionStatus, JobStatus, Notification};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{AiJobBridge, BridgeEvent, FrameKind, MonitorTarget};
use crate::db::frameworks;
use crate::error::{ApiError, ApiResult};
use crate::models::{Framework, JobUpdate, ProcessingJob, Transition};
use crate::services::registry::{Relay, RelayHub};

/// Result of an on-demand status check
#[derive(Debug, Clone)]
pub struct StatusCheck {
    /// Status string as the AI service reported it
    pub ai_status: String,
    pub transition: Transition,
    pub job: ProcessingJob,
}

#[derive(Clone)]
pub struct ProcessingService {
    db: SqlitePool,
    bridge: Arc<AiJobBridge>,
    hub: RelayHub,
}

impl ProcessingService {
    pub fn new(db: SqlitePool, bridge: Arc<AiJobBridge>, hub: RelayHub) -> Self {
        Self { db, bridge, hub }
    }

    /// Load a framework the caller owns
    pub async fn load_owned(&self, user_id: &str, framework_id: Uuid) -> ApiResult<Framework> {
        load_owned(&self.db, user_id, framework_id).await
    }

    /// Upload the framework's document to the AI service and start monitoring the job
    ///
    /// Upload failures leave the record untouched.
    pub async fn start(&self, user_id: &str, framework_id: Uuid) -> ApiResult<ProcessingJob> {
        let mut framework = self.load_owned(user_id, framework_id).await?;

        if !framework.job.can_upload() {
            return Err(ApiError::Conflict(format!(
                "Framework {} already has AI job {} ({})",
                framework_id,
                framework.job.job_id.as_deref().unwrap_or_default(),
                framework.job.status
            )));
        }

        let upload = self
            .bridge
            .upload(&framework.file_path, &framework.file_name)
            .await
            .map_err(|e| {
                warn!(framework_id = %framework_id, error = %e, "AI upload failed");
                ApiError::from(e)
            })?;

        let extraction = upload
            .control_extraction_status
            .as_deref()
            .and_then(|s| s.parse::<ExtractionStatus>().ok())
            .unwrap_or(ExtractionStatus::Pending);
        framework
            .job
            .record_upload(upload.job_id.clone(), extraction, Utc::now());

        if !frameworks::record_upload(&self.db, framework_id, &framework.job).await? {
            warn!(
                framework_id = %framework_id,
                job_id = %upload.job_id,
                "Concurrent upload already recorded; new AI job abandoned"
            );
            return Err(ApiError::Conflict(format!(
                "Framework {} was uploaded concurrently",
                framework_id
            )));
        }

        info!(framework_id = %framework_id, job_id = %upload.job_id, "Framework uploaded");
        self.notify(&framework, Transition::Advanced).await;
        self.watch(framework_id, upload.job_id).await;

        Ok(framework.job)
    }

    /// Apply an update for `job_id` to the framework record
    ///
    /// Updates for a job that is no longer the framework's current one are ignored. Returns
    /// [`Transition::Unchanged`] when nothing was written, including when a concurrent writer
    /// reached the same terminal state first.
    pub async fn apply(
        &self,
        framework_id: Uuid,
        job_id: &str,
        update: JobUpdate,
    ) -> ApiResult<Transition> {
        self.apply_all(framework_id, job_id, &[update]).await
    }

    /// Apply updates observed together as one write and at most one notification
    pub async fn apply_all(
        &self,
        framework_id: Uuid,
        job_id: &str,
        updates: &[JobUpdate],
    ) -> ApiResult<Transition> {
        let Some(mut framework) = frameworks::load(&self.db, framework_id).await? else {
            return Err(ApiError::NotFound(format!("Framework {}", framework_id)));
        };

        if framework.job.job_id.as_deref() != Some(job_id) {
            debug!(framework_id = %framework_id, job_id, "Update for superseded job ignored");
            return Ok(Transition::Unchanged);
        }

        let transition = framework.job.apply_all(updates, Utc::now());
        if !transition.is_change() {
            return Ok(Transition::Unchanged);
        }

        let saved = if transition.is_terminal() {
            frameworks::save_terminal(&self.db, framework_id, job_id, &framework.job).await?
        } else {
            frameworks::save_progress(&self.db, framework_id, job_id, &framework.job).await?
        };

        if !saved {
            debug!(framework_id = %framework_id, job_id, "Lost write race; not notifying");
            return Ok(Transition::Unchanged);
        }

        match transition {
            Transition::Completed => info!(
                framework_id = %framework_id,
                job_id,
                item_count = framework.job.item_count,
                "Processing completed"
            ),
            Transition::Failed => warn!(
                framework_id = %framework_id,
                job_id,
                error = framework.job.error_message.as_deref().unwrap_or_default(),
                "Processing failed"
            ),
            _ => debug!(
                framework_id = %framework_id,
                job_id,
                status = %framework.job.status,
                extraction = %framework.job.control_extraction_status,
                "Processing advanced"
            ),
        }

        self.notify(&framework, transition).await;
        Ok(transition)
    }

    /// Ask the AI service for the job's status and apply it if terminal
    ///
    /// Completion only counts when it carries results.
    pub async fn reconcile(&self, framework_id: Uuid, job_id: &str) -> ApiResult<StatusCheck> {
        let frame = self.bridge.check_status(job_id).await?;

        let update = match frame.classify() {
            FrameKind::Completed(items) if !items.is_empty() => Some(JobUpdate::Completed { items }),
            FrameKind::Failed(message) => Some(JobUpdate::Failed { message }),
            other => {
                debug!(framework_id = %framework_id, job_id, kind = ?other, "No terminal status yet");
                None
            }
        };

        let transition = match update {
            Some(update) => self.apply(framework_id, job_id, update).await?,
            None => Transition::Unchanged,
        };

        let job = frameworks::load(&self.db, framework_id)
            .await?
            .map(|framework| framework.job)
            .ok_or_else(|| ApiError::NotFound(format!("Framework {}", framework_id)))?;

        Ok(StatusCheck {
            ai_status: frame.status,
            transition,
            job,
        })
    }

    /// On-demand status check for the framework's current job
    pub async fn check_now(&self, user_id: &str, framework_id: Uuid) -> ApiResult<StatusCheck> {
        let framework = self.load_owned(user_id, framework_id).await?;
        let job_id = framework.job.job_id.ok_or_else(|| {
            ApiError::BadRequest(format!("Framework {} has not been uploaded", framework_id))
        })?;

        self.reconcile(framework_id, &job_id).await
    }

    // Start a monitor and relay its events into `apply`.
    async fn watch(&self, framework_id: Uuid, job_id: String) {
        let target = MonitorTarget::Job {
            job_id: job_id.clone(),
        };
        match self.bridge.monitor(target).await {
            Ok(Some(events)) => {
                let service = self.clone();
                tokio::spawn(async move { service.relay(framework_id, job_id, events).await });
            }
            Ok(None) => debug!(job_id = %job_id, "Job already monitored"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to start monitor"),
        }
    }

    async fn relay(
        &self,
        framework_id: Uuid,
        job_id: String,
        mut events: mpsc::Receiver<BridgeEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let updates = match event {
                BridgeEvent::Frame(frame) => match frame.classify() {
                    FrameKind::Unknown(status) => {
                        debug!(job_id = %job_id, status = %status, "Ignoring unknown AI status");
                        continue;
                    }
                    _ => frame.updates(),
                },
                BridgeEvent::Error(message) => vec![JobUpdate::Failed { message }],
                BridgeEvent::Closed { code, reason } => {
                    info!(job_id = %job_id, ?code, reason = %reason, "AI stream closed");
                    continue;
                }
            };

            if let Err(e) = self.apply_all(framework_id, &job_id, &updates).await {
                warn!(framework_id = %framework_id, job_id = %job_id, error = %e, "Failed to apply AI update");
            }
        }
    }

    async fn notify(&self, framework: &Framework, transition: Transition) {
        let job = &framework.job;
        let (message, item_count, extracted_items, error_message) = match transition {
            Transition::Completed => (
                "Processing completed".to_string(),
                Some(job.item_count),
                Some(job.extracted_items.clone()),
                None,
            ),
            Transition::Failed => (
                "Processing failed".to_string(),
                None,
                None,
                job.error_message.clone(),
            ),
            _ => (progress_message(job), None, None, None),
        };

        let notification = Notification::FrameworkUpdate {
            framework_id: framework.id,
            subject_kind: framework.kind,
            status: job.status,
            control_extraction_status: job.control_extraction_status,
            message,
            item_count,
            extracted_items,
            error_message,
        };

        self.hub
            .deliver(Relay::for_subject(framework.kind), &framework.user_id, &notification)
            .await;
    }
}

fn progress_message(job: &ProcessingJob) -> String {
    match (job.status, job.control_extraction_status) {
        (JobStatus::Uploaded, ExtractionStatus::Pending) => "Uploaded to AI service".to_string(),
        (_, ExtractionStatus::Started) => "Control extraction started".to_string(),
        _ => "Processing in progress".to_string(),
    }
}

/// Load a framework, checking the caller owns it
pub(crate) async fn load_owned(
    db: &SqlitePool,
    user_id: &str,
    framework_id: Uuid,
) -> ApiResult<Framework> {
    let framework = frameworks::load(db, framework_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {}", framework_id)))?;

    if framework.user_id != user_id {
        return Err(ApiError::Forbidden(format!(
            "Framework {} belongs to another user",
            framework_id
        )));
    }
    Ok(framework)
}
