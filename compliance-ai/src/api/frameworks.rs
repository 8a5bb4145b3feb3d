//! Framework processing endpoints
//!
//! Record creation is the minimal entry point the document service would normally own;
//! everything else drives or reads the processing state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use compliance_common::events::{ExtractionStatus, JobStatus, SubjectKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::db::frameworks;
use crate::error::{ApiError, ApiResult};
use crate::models::{Framework, ProcessingJob};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrameworkRequest {
    pub kind: SubjectKind,
    pub file_name: String,
    /// Path relative to the storage root
    pub file_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub framework_id: Uuid,
    pub job_id: Option<String>,
    pub status: JobStatus,
    pub control_extraction_status: ExtractionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub framework_id: Uuid,
    #[serde(flatten)]
    pub job: ProcessingJob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResponse {
    pub framework_id: Uuid,
    /// Status string reported by the AI service
    pub ai_status: String,
    /// True if this check moved the job to a terminal state
    pub updated: bool,
    #[serde(flatten)]
    pub job: ProcessingJob,
}

/// POST /frameworks
pub async fn create_framework(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateFrameworkRequest>,
) -> ApiResult<(StatusCode, Json<Framework>)> {
    if request.file_name.trim().is_empty() || request.file_path.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "fileName and filePath are required".to_string(),
        ));
    }

    let framework = Framework::new(
        user.user_id,
        request.kind,
        request.file_name,
        request.file_path,
    );
    frameworks::insert(&state.db, &framework).await?;

    tracing::info!(framework_id = %framework.id, kind = %framework.kind, "Framework registered");
    Ok((StatusCode::CREATED, Json(framework)))
}

/// POST /frameworks/:id/process
pub async fn process_framework(
    State(state): State<AppState>,
    user: AuthUser,
    Path(framework_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ProcessResponse>)> {
    let job = state.processing.start(&user.user_id, framework_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessResponse {
            framework_id,
            job_id: job.job_id,
            status: job.status,
            control_extraction_status: job.control_extraction_status,
        }),
    ))
}

/// GET /frameworks/:id/status
pub async fn framework_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(framework_id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    let framework = state
        .processing
        .load_owned(&user.user_id, framework_id)
        .await?;

    Ok(Json(StatusResponse {
        framework_id,
        job: framework.job,
    }))
}

/// POST /frameworks/:id/check-status
pub async fn check_framework_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(framework_id): Path<Uuid>,
) -> ApiResult<Json<CheckStatusResponse>> {
    let check = state
        .processing
        .check_now(&user.user_id, framework_id)
        .await?;

    Ok(Json(CheckStatusResponse {
        framework_id,
        ai_status: check.ai_status,
        updated: check.transition.is_change(),
        job: check.job,
    }))
}

/// Build framework routes
pub fn framework_routes() -> Router<AppState> {
    Router::new()
        .route("/frameworks", post(create_framework))
        .route("/frameworks/:id/process", post(process_framework))
        .route("/frameworks/:id/status", get(framework_status))
        .route("/frameworks/:id/check-status", post(check_framework_status))
}
