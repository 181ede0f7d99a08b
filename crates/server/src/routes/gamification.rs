use axum::{
    Json, Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use db::models::xp_transaction::XpTransaction;
use deployment::Deployment;
use serde::Deserialize;
use services::services::gamification::{AddXp, GamificationData, GamificationService, XpOutcome};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn get_data(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<GamificationData>>, ApiError> {
    let data = GamificationService::data(&deployment.db().pool, &user, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(data)))
}

pub async fn add_xp(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<AddXp>,
) -> Result<ResponseJson<ApiResponse<XpOutcome>>, ApiError> {
    let outcome =
        GamificationService::add_xp(&deployment.db().pool, user.id, payload, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn xp_history(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<XpTransaction>>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let history = XpTransaction::find_by_user(&deployment.db().pool, user.id, limit).await?;
    Ok(ResponseJson(ApiResponse::success(history)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/gamification",
        Router::new()
            .route("/data", get(get_data))
            .route("/xp", post(add_xp))
            .route("/xp/history", get(xp_history)),
    )
}
