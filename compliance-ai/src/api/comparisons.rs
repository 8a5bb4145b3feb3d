//! Comparison endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::auth::AuthUser;
use crate::error::ApiResult;
use crate::models::ComparisonJob;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartComparisonRequest {
    pub user_framework_id: Uuid,
    pub expert_framework_id: Uuid,
}

/// POST /comparisons
pub async fn start_comparison(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<StartComparisonRequest>,
) -> ApiResult<(StatusCode, Json<ComparisonJob>)> {
    let job = state
        .comparisons
        .start(
            &user.user_id,
            request.user_framework_id,
            request.expert_framework_id,
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /comparisons/:id
pub async fn get_comparison(
    State(state): State<AppState>,
    user: AuthUser,
    Path(comparison_id): Path<Uuid>,
) -> ApiResult<Json<ComparisonJob>> {
    Ok(Json(
        state.comparisons.get(&user.user_id, comparison_id).await?,
    ))
}

/// POST /comparisons/:id/done
pub async fn acknowledge_comparison(
    State(state): State<AppState>,
    user: AuthUser,
    Path(comparison_id): Path<Uuid>,
) -> ApiResult<Json<ComparisonJob>> {
    Ok(Json(
        state
            .comparisons
            .mark_done(&user.user_id, comparison_id)
            .await?,
    ))
}

/// Build comparison routes
pub fn comparison_routes() -> Router<AppState> {
    Router::new()
        .route("/comparisons", post(start_comparison))
        .route("/comparisons/:id", get(get_comparison))
        .route("/comparisons/:id/done", post(acknowledge_comparison))
}
