use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use deployment::Deployment;
use serde::Deserialize;
use services::services::coach::{
    AiResponse, AiStatus, CoachingRequest, Optimization, SuggestionRequest,
};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

#[derive(Debug, Deserialize)]
pub struct MotivationQuery {
    pub context: Option<String>,
}

pub async fn status(
    State(deployment): State<DeploymentImpl>,
) -> ResponseJson<ApiResponse<AiStatus>> {
    ResponseJson(ApiResponse::success(deployment.coach().status()))
}

pub async fn insights(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let response = deployment
        .coach()
        .insights(&deployment.db().pool, &user, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn suggestions(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<SuggestionRequest>,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let response = deployment
        .coach()
        .suggestions(&deployment.db().pool, &user, request, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn patterns(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let response = deployment
        .coach()
        .patterns(&deployment.db().pool, &user, habit_id, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn motivation(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<MotivationQuery>,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let context = query.context.unwrap_or_else(|| "daily".to_string());
    let response = deployment
        .coach()
        .motivation(&deployment.db().pool, &user, &context, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn mood_correlation(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let response = deployment
        .coach()
        .mood_correlation(&deployment.db().pool, &user, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn coaching(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CoachingRequest>,
) -> Result<ResponseJson<ApiResponse<AiResponse>>, ApiError> {
    let response = deployment
        .coach()
        .coaching(&deployment.db().pool, &user, request, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(response)))
}

pub async fn optimize(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Optimization>>, ApiError> {
    let optimization = deployment
        .coach()
        .optimize(&deployment.db().pool, &user, habit_id, Utc::now())
        .await?;
    Ok(ResponseJson(ApiResponse::success(optimization)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/ai",
        Router::new()
            .route("/status", get(status))
            .route("/insights", get(insights))
            .route("/suggestions", post(suggestions))
            .route("/patterns/{habit_id}", get(patterns))
            .route("/motivation", get(motivation))
            .route("/mood-correlation", get(mood_correlation))
            .route("/coaching", post(coaching))
            .route("/optimize/{habit_id}", get(optimize)),
    )
}
