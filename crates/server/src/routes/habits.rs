use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use db::models::{
    completion::{CompleteHabit, Completion},
    habit::{CreateHabit, Habit, HabitFilter, HabitWithCompletions, UpdateHabit},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::gamification::{
    CompletionOutcome, ForgiveHabit, ForgivenessOutcome, GamificationService,
};
use tracing::info;
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

const RECENT_COMPLETIONS: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Week,
    #[default]
    Month,
    Year,
}

impl StatsPeriod {
    /// Unrecognised values fall back to a month.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("week") => StatsPeriod::Week,
            Some("year") => StatsPeriod::Year,
            _ => StatsPeriod::Month,
        }
    }

    pub fn days(self) -> i64 {
        match self {
            StatsPeriod::Week => 7,
            StatsPeriod::Month => 30,
            StatsPeriod::Year => 365,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PeriodStats {
    pub period: StatsPeriod,
    pub days: i64,
    pub completions: i64,
    pub total_xp: i64,
    pub average_xp_per_day: f64,
    pub completion_rate: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct HabitStatsResponse {
    pub habit_id: Uuid,
    pub total_completions: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub consistency_rate: i64,
    pub period: PeriodStats,
}

#[derive(Debug, Deserialize)]
pub struct CompletionsQuery {
    pub days: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CompletionPage {
    pub completions: Vec<Completion>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RecalculateResult {
    pub updated: usize,
}

fn period_stats(period: StatsPeriod, completions: &[Completion]) -> PeriodStats {
    let days = period.days();
    let count = completions.len() as i64;
    let total_xp: i64 = completions.iter().map(|c| c.xp_earned).sum();
    let average = total_xp as f64 / days as f64;
    PeriodStats {
        period,
        days,
        completions: count,
        total_xp,
        average_xp_per_day: (average * 100.0).round() / 100.0,
        completion_rate: ((count as f64 / days as f64) * 100.0).round().min(100.0) as i64,
    }
}

async fn owned_habit(
    deployment: &DeploymentImpl,
    habit_id: Uuid,
    user_id: Uuid,
) -> Result<Habit, ApiError> {
    Habit::find_for_user(&deployment.db().pool, habit_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Habit not found".to_string()))
}

pub async fn list_habits(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<HabitFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<Habit>>>, ApiError> {
    let habits = Habit::find_by_user(&deployment.db().pool, user.id, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(habits)))
}

pub async fn create_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateHabit>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<Habit>>), ApiError> {
    let payload = payload.validated()?;
    let habit = Habit::create(&deployment.db().pool, user.id, &payload, Utc::now()).await?;
    info!(habit_id = %habit.id, user_id = %user.id, "Created habit");
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success_with_message(habit, "Habit created")),
    ))
}

pub async fn get_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<HabitWithCompletions>>, ApiError> {
    let habit = owned_habit(&deployment, habit_id, user.id).await?;
    let completions =
        Completion::find_recent_for_habit(&deployment.db().pool, habit.id, RECENT_COMPLETIONS)
            .await?;
    Ok(ResponseJson(ApiResponse::success(HabitWithCompletions {
        habit,
        completions,
    })))
}

pub async fn update_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
    Json(payload): Json<UpdateHabit>,
) -> Result<ResponseJson<ApiResponse<Habit>>, ApiError> {
    let mut habit = owned_habit(&deployment, habit_id, user.id).await?;
    payload.apply_to(&mut habit)?;
    let habit = Habit::save_details(&deployment.db().pool, &habit, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success(habit)))
}

/// Removes the habit together with its completions.
pub async fn delete_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let mut tx = deployment.db().pool.begin().await?;
    if Habit::find_for_user(&mut *tx, habit_id, user.id).await?.is_none() {
        return Err(ApiError::NotFound("Habit not found".to_string()));
    }
    let removed = Completion::delete_for_habit(&mut *tx, habit_id).await?;
    Habit::delete(&mut *tx, habit_id, user.id).await?;
    tx.commit().await?;

    info!(habit_id = %habit_id, completions = removed, "Deleted habit");
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Habit deleted",
    )))
}

pub async fn archive_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Habit>>, ApiError> {
    let habit = Habit::archive(&deployment.db().pool, habit_id, user.id, Utc::now())
        .await?
        .ok_or_else(|| ApiError::NotFound("Habit not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        habit,
        "Habit archived",
    )))
}

pub async fn complete_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
    payload: Option<Json<CompleteHabit>>,
) -> Result<ResponseJson<ApiResponse<CompletionOutcome>>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let outcome = GamificationService::complete_habit(
        &deployment.db().pool,
        user.id,
        habit_id,
        payload,
        Utc::now(),
    )
    .await?;
    let message = if outcome.leveled_up {
        format!("Habit completed! Level up to {}", outcome.new_level)
    } else {
        "Habit completed!".to_string()
    };
    Ok(ResponseJson(ApiResponse::success_with_message(
        outcome, message,
    )))
}

pub async fn forgive_habit(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
    Json(payload): Json<ForgiveHabit>,
) -> Result<ResponseJson<ApiResponse<ForgivenessOutcome>>, ApiError> {
    let outcome = GamificationService::use_forgiveness(
        &deployment.db().pool,
        user.id,
        habit_id,
        payload,
        Utc::now(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        outcome,
        "Forgiveness token used",
    )))
}

pub async fn habit_stats(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<ResponseJson<ApiResponse<HabitStatsResponse>>, ApiError> {
    let habit = owned_habit(&deployment, habit_id, user.id).await?;
    let period = StatsPeriod::parse(query.period.as_deref());
    let since = Utc::now().date_naive() - Duration::days(period.days() - 1);
    // At most one completion per day, so one page covers the period.
    let (completions, _) =
        Completion::page_for_habit(&deployment.db().pool, habit.id, since, period.days(), 0)
            .await?;

    Ok(ResponseJson(ApiResponse::success(HabitStatsResponse {
        habit_id: habit.id,
        total_completions: habit.total_completions,
        current_streak: habit.current_streak,
        longest_streak: habit.longest_streak,
        consistency_rate: habit.consistency_rate,
        period: period_stats(period, &completions),
    })))
}

pub async fn habit_completions(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(habit_id): Path<Uuid>,
    Query(query): Query<CompletionsQuery>,
) -> Result<ResponseJson<ApiResponse<CompletionPage>>, ApiError> {
    let habit = owned_habit(&deployment, habit_id, user.id).await?;
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = query.page.unwrap_or(1).max(1);
    let since = Utc::now().date_naive() - Duration::days(days - 1);

    let (completions, total) = Completion::page_for_habit(
        &deployment.db().pool,
        habit.id,
        since,
        limit,
        (page - 1).saturating_mul(limit),
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(CompletionPage {
        completions,
        pagination: Pagination {
            page,
            limit,
            total,
            pages: (total + limit - 1) / limit,
        },
    })))
}

pub async fn completed_today(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<Vec<Uuid>>>, ApiError> {
    let ids =
        Completion::habit_ids_on_day(&deployment.db().pool, user.id, Utc::now().date_naive())
            .await?;
    Ok(ResponseJson(ApiResponse::success(ids)))
}

pub async fn recalculate(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<RecalculateResult>>, ApiError> {
    let updated =
        GamificationService::recalculate_user_habits(&deployment.db().pool, user.id, Utc::now())
            .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        RecalculateResult { updated },
        format!("Recalculated {updated} habits"),
    )))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let habit_id_router = Router::new()
        .route(
            "/",
            get(get_habit).patch(update_habit).delete(delete_habit),
        )
        .route("/archive", post(archive_habit))
        .route("/complete", post(complete_habit))
        .route("/forgive", post(forgive_habit))
        .route("/stats", get(habit_stats))
        .route("/completions", get(habit_completions));

    Router::new().nest(
        "/habits",
        Router::new()
            .route("/", get(list_habits).post(create_habit))
            .route("/completions/today", get(completed_today))
            .route("/recalculate", post(recalculate))
            .nest("/{habit_id}", habit_id_router),
    )
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::test_support::{app, register, send};

    async fn create(app: &Router, user: Uuid, body: Value) -> Uuid {
        let (status, body) = send(app, "POST", "/api/habits", Some(user), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().parse().unwrap()
    }

    #[test]
    fn unknown_period_falls_back_to_month() {
        assert_eq!(StatsPeriod::parse(Some("week")).days(), 7);
        assert_eq!(StatsPeriod::parse(Some("year")).days(), 365);
        assert_eq!(StatsPeriod::parse(Some("decade")), StatsPeriod::Month);
        assert_eq!(StatsPeriod::parse(None).days(), 30);
    }

    #[tokio::test]
    async fn habits_are_scoped_to_owner() {
        let app = app().await;
        let owner = register(&app, "Owner").await;
        let other = register(&app, "Other").await;
        let habit = create(&app, owner, json!({ "name": "Read", "category": "learning" })).await;

        let uri = format!("/api/habits/{habit}");
        let (status, body) = send(&app, "GET", &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["color"], "#3B82F6");
        assert_eq!(body["data"]["icon"], "star");
        assert_eq!(body["data"]["completions"], json!([]));

        let (status, _) = send(&app, "GET", &uri, Some(other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &uri, Some(other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", "/api/habits", Some(other), None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn list_filters_by_category() {
        let app = app().await;
        let user = register(&app, "Filter").await;
        create(&app, user, json!({ "name": "Run", "category": "fitness" })).await;
        create(&app, user, json!({ "name": "Save", "category": "finance" })).await;

        let (status, body) =
            send(&app, "GET", "/api/habits?category=fitness", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        let habits = body["data"].as_array().unwrap();
        assert_eq!(habits.len(), 1);
        assert_eq!(habits[0]["name"], "Run");
    }

    #[tokio::test]
    async fn patch_cannot_touch_statistics() {
        let app = app().await;
        let user = register(&app, "Patch").await;
        let habit = create(&app, user, json!({ "name": "Walk" })).await;

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/habits/{habit}"),
            Some(user),
            Some(json!({ "name": "Walk far", "current_streak": 50 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Walk far");
        assert_eq!(body["data"]["current_streak"], 0);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/habits/{habit}"),
            Some(user),
            Some(json!({ "color": "blue" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn complete_twice_conflicts_and_shows_up_today() {
        let app = app().await;
        let user = register(&app, "Doer").await;
        let habit = create(&app, user, json!({ "name": "Stretch" })).await;
        let uri = format!("/api/habits/{habit}/complete");

        let (status, body) = send(&app, "POST", &uri, Some(user), Some(json!({ "mood": 4 }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["xp_earned"], 15);
        assert_eq!(body["data"]["current_streak"], 1);

        let (status, _) = send(&app, "POST", &uri, Some(user), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "GET", "/api/habits/completions/today", Some(user), None).await;
        assert_eq!(body["data"], json!([habit.to_string()]));
    }

    #[tokio::test]
    async fn archived_habit_cannot_be_completed() {
        let app = app().await;
        let user = register(&app, "Archiver").await;
        let habit = create(&app, user, json!({ "name": "Old" })).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/archive"),
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["archived"], true);
        assert_eq!(body["data"]["active"], false);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/complete"),
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forgiveness_fills_missed_day() {
        let app = app().await;
        let user = register(&app, "Forgiven").await;
        let habit = create(&app, user, json!({ "name": "Journal" })).await;
        let yesterday = Utc::now() - Duration::days(1);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/forgive"),
            Some(user),
            Some(json!({ "date": yesterday })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["remaining_tokens"], 1);
        assert_eq!(body["data"]["completion"]["forgiveness_used"], true);
        assert_eq!(body["data"]["completion"]["xp_earned"], 5);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/forgive"),
            Some(user),
            Some(json!({ "date": yesterday })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn stats_and_paginated_completions() {
        let app = app().await;
        let user = register(&app, "Stats").await;
        let habit = create(&app, user, json!({ "name": "Meditate" })).await;
        for days_ago in [2, 1, 0] {
            let date = Utc::now() - Duration::days(days_ago);
            let (status, body) = send(
                &app,
                "POST",
                &format!("/api/habits/{habit}/complete"),
                Some(user),
                Some(json!({ "date": date })),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/habits/{habit}/stats?period=week"),
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_completions"], 3);
        assert_eq!(body["data"]["current_streak"], 3);
        assert_eq!(body["data"]["period"]["days"], 7);
        assert_eq!(body["data"]["period"]["completions"], 3);
        assert_eq!(body["data"]["period"]["completion_rate"], 43);

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/habits/{habit}/completions?limit=2&page=2"),
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["completions"].as_array().unwrap().len(), 1);
        assert_eq!(
            body["data"]["pagination"],
            json!({ "page": 2, "limit": 2, "total": 3, "pages": 2 })
        );
    }

    #[tokio::test]
    async fn pages_past_the_end_are_empty() {
        let app = app().await;
        let user = register(&app, "Pager").await;
        let habit = create(&app, user, json!({ "name": "Stretch" })).await;
        send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/complete"),
            Some(user),
            None,
        )
        .await;

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/habits/{habit}/completions?limit=100&page={}", i64::MAX),
            Some(user),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["data"]["completions"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["pagination"]["total"], 1);
        assert_eq!(body["data"]["pagination"]["page"], i64::MAX);
    }

    #[tokio::test]
    async fn delete_removes_habit_and_history() {
        let app = app().await;
        let user = register(&app, "Deleter").await;
        let habit = create(&app, user, json!({ "name": "Floss" })).await;
        send(
            &app,
            "POST",
            &format!("/api/habits/{habit}/complete"),
            Some(user),
            None,
        )
        .await;

        let uri = format!("/api/habits/{habit}");
        let (status, _) = send(&app, "DELETE", &uri, Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &uri, Some(user), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&app, "GET", "/api/habits/completions/today", Some(user), None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn recalculate_reports_count() {
        let app = app().await;
        let user = register(&app, "Recalc").await;
        create(&app, user, json!({ "name": "One" })).await;
        create(&app, user, json!({ "name": "Two" })).await;

        let (status, body) =
            send(&app, "POST", "/api/habits/recalculate", Some(user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["updated"], 2);
    }
}
