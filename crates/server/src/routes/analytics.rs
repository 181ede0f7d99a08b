use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use chrono::Utc;
use deployment::Deployment;
use serde::Deserialize;
use services::services::analytics::{
    AnalyticsService, ConsistencyDay, HabitPerformance, Overview, TrendPoint, WeeklySummary,
    clamp_days,
};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub time_range: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub month: Option<String>,
}

pub async fn overview(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<WindowQuery>,
) -> Result<ResponseJson<ApiResponse<Overview>>, ApiError> {
    let overview = AnalyticsService::overview(
        &deployment.db().pool,
        user.id,
        clamp_days(query.days),
        Utc::now().date_naive(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(overview)))
}

pub async fn trends(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<WindowQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<TrendPoint>>>, ApiError> {
    let trends = AnalyticsService::trends(
        &deployment.db().pool,
        user.id,
        clamp_days(query.days),
        Utc::now().date_naive(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(trends)))
}

pub async fn weekly_summary(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<WeeklySummary>>, ApiError> {
    let summary =
        AnalyticsService::weekly_summary(&deployment.db().pool, user.id, Utc::now().date_naive())
            .await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub async fn habit_performance(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PerformanceQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<HabitPerformance>>>, ApiError> {
    let performance = AnalyticsService::habit_performance(
        &deployment.db().pool,
        user.id,
        clamp_days(query.time_range),
        Utc::now().date_naive(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(performance)))
}

/// Heat-map for a month; defaults to the current one.
pub async fn consistency(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<MonthQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<ConsistencyDay>>>, ApiError> {
    let month = query
        .month
        .unwrap_or_else(|| Utc::now().format("%Y-%m").to_string());
    let days = AnalyticsService::consistency(&deployment.db().pool, user.id, &month).await?;
    Ok(ResponseJson(ApiResponse::success(days)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/analytics",
        Router::new()
            .route("/overview", get(overview))
            .route("/trends", get(trends))
            .route("/weekly-summary", get(weekly_summary))
            .route("/habit-performance", get(habit_performance))
            .route("/consistency", get(consistency)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    use crate::test_support::{app, register, send};

    #[tokio::test]
    async fn dashboard_reflects_todays_completion() {
        let app = app().await;
        let user = register(&app, "Analyst").await;
        let (_, body) = send(
            &app,
            "POST",
            "/api/habits",
            Some(user),
            Some(json!({ "name": "Water" })),
        )
        .await;
        let habit = body["data"]["id"].as_str().unwrap().to_string();
        send(&app, "POST", &format!("/api/habits/{habit}/complete"), Some(user), None).await;
        send(&app, "POST", "/api/habits", Some(user), Some(json!({ "name": "Sleep" }))).await;

        let (status, body) =
            send(&app, "GET", "/api/analytics/overview?days=10", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_habits"], 2);
        assert_eq!(body["data"]["today_completions"], 1);
        assert_eq!(body["data"]["consistency_rate"], 5);
        assert_eq!(body["data"]["today_completion_rate"], 50);

        let (_, body) = send(&app, "GET", "/api/analytics/trends?days=5", Some(user), None).await;
        let points = body["data"].as_array().unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[4]["completions"], 1);
        assert_eq!(points[0]["completions"], 0);

        let (_, body) = send(&app, "GET", "/api/analytics/consistency", Some(user), None).await;
        let today = Utc::now().date_naive().to_string();
        assert_eq!(body["data"], json!([{ "date": today, "value": 1, "level": 1 }]));
    }

    #[tokio::test]
    async fn invalid_month_is_bad_request() {
        let app = app().await;
        let user = register(&app, "Months").await;
        let (status, _) = send(
            &app,
            "GET",
            "/api/analytics/consistency?month=2024-13",
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn weekly_summary_without_data_has_no_best_day() {
        let app = app().await;
        let user = register(&app, "Idle").await;
        let (status, body) =
            send(&app, "GET", "/api/analytics/weekly-summary", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_completions"], 0);
        assert_eq!(body["data"]["best_day"], json!(null));

        let (status, body) = send(
            &app,
            "GET",
            "/api/analytics/habit-performance?time_range=9999",
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
    }
}
