//! Community circles: membership, chat, leaderboards, events and challenges.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{delete, get, post, put},
};
use chrono::Utc;
use db::models::{
    challenge::{ChallengeParticipant, CircleChallenge, CreateChallenge},
    circle::{CircleMember, CommunityCircle, CreateCircle},
    circle_event::{CircleEvent, CreateCircleEvent},
    circle_message::{CircleMessage, PostMessage},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::community::{
    CircleDetails, CircleListing, CommunityService, JoinCircle, LeaderboardEntry,
    LeaderboardOptOut, MessageStats, ProgressOutcome, UpdateChallengeProgress,
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct LeaderboardOptOutStatus {
    pub opt_out_of_leaderboard: bool,
}

pub async fn create_circle(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateCircle>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<CommunityCircle>>), ApiError> {
    let circle =
        CommunityService::create_circle(&deployment.db().pool, user.id, payload, Utc::now())
            .await?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success_with_message(circle, "Circle created")),
    ))
}

pub async fn list_circles(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<Vec<CircleListing>>>, ApiError> {
    let circles = CommunityService::list(&deployment.db().pool, user.id).await?;
    Ok(ResponseJson(ApiResponse::success(circles)))
}

pub async fn get_circle(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CircleDetails>>, ApiError> {
    let details = CommunityService::details(&deployment.db().pool, user.id, circle_id).await?;
    Ok(ResponseJson(ApiResponse::success(details)))
}

pub async fn join_circle(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
    payload: Option<Json<JoinCircle>>,
) -> Result<ResponseJson<ApiResponse<CircleMember>>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let member =
        CommunityService::join(&deployment.db().pool, user.id, circle_id, payload, Utc::now())
            .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        member,
        "Joined circle",
    )))
}

pub async fn leave_circle(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    CommunityService::leave(&deployment.db().pool, user.id, circle_id).await?;
    Ok(ResponseJson(ApiResponse::success_with_message((), "Left circle")))
}

pub async fn post_message(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
    Json(payload): Json<PostMessage>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<CircleMessage>>), ApiError> {
    let message = CommunityService::post_message(
        &deployment.db().pool,
        user.id,
        circle_id,
        payload,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(message))))
}

pub async fn message_stats(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<MessageStats>>, ApiError> {
    let stats =
        CommunityService::message_stats(&deployment.db().pool, user.id, circle_id, Utc::now())
            .await?;
    Ok(ResponseJson(ApiResponse::success(stats)))
}

pub async fn leaderboard(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<LeaderboardEntry>>>, ApiError> {
    let entries = CommunityService::leaderboard(&deployment.db().pool, user.id, circle_id).await?;
    Ok(ResponseJson(ApiResponse::success(entries)))
}

/// Sets the flag when given, otherwise toggles it.
pub async fn leaderboard_opt_out(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
    payload: Option<Json<LeaderboardOptOut>>,
) -> Result<ResponseJson<ApiResponse<LeaderboardOptOutStatus>>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let opt_out = CommunityService::set_leaderboard_opt_out(
        &deployment.db().pool,
        user.id,
        circle_id,
        payload,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(LeaderboardOptOutStatus {
        opt_out_of_leaderboard: opt_out,
    })))
}

pub async fn create_event(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
    Json(payload): Json<CreateCircleEvent>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<CircleEvent>>), ApiError> {
    let event = CommunityService::create_event(
        &deployment.db().pool,
        user.id,
        circle_id,
        payload,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(event))))
}

pub async fn create_challenge(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path(circle_id): Path<Uuid>,
    Json(payload): Json<CreateChallenge>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<CircleChallenge>>), ApiError> {
    let challenge = CommunityService::create_challenge(
        &deployment.db().pool,
        user.id,
        circle_id,
        payload,
        Utc::now(),
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success(challenge)),
    ))
}

pub async fn join_challenge(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path((circle_id, challenge_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<ChallengeParticipant>>, ApiError> {
    let participant = CommunityService::join_challenge(
        &deployment.db().pool,
        user.id,
        circle_id,
        challenge_id,
        Utc::now(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        participant,
        "Joined challenge",
    )))
}

pub async fn update_challenge_progress(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
    Path((circle_id, challenge_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateChallengeProgress>,
) -> Result<ResponseJson<ApiResponse<ProgressOutcome>>, ApiError> {
    let outcome = CommunityService::update_challenge_progress(
        &deployment.db().pool,
        user.id,
        circle_id,
        challenge_id,
        payload,
        Utc::now(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let circle_router = Router::new()
        .route("/", get(get_circle))
        .route("/join", post(join_circle))
        .route("/leave", delete(leave_circle))
        .route("/messages", post(post_message))
        .route("/messages/stats", get(message_stats))
        .route("/leaderboard", get(leaderboard))
        .route("/leaderboard/opt-out", put(leaderboard_opt_out))
        .route("/events", post(create_event))
        .route("/challenges", post(create_challenge))
        .route("/challenges/{challenge_id}/join", post(join_challenge))
        .route(
            "/challenges/{challenge_id}/progress",
            put(update_challenge_progress),
        );

    Router::new().nest(
        "/community",
        Router::new()
            .route("/", get(list_circles).post(create_circle))
            .nest("/{circle_id}", circle_router),
    )
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use crate::test_support::{app, register, send};

    async fn circle(app: &Router, owner: Uuid, body: Value) -> Value {
        let (status, body) = send(app, "POST", "/api/community", Some(owner), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }

    #[tokio::test]
    async fn private_circle_requires_invite_code() {
        let app = app().await;
        let owner = register(&app, "Owner").await;
        let guest = register(&app, "Guest").await;
        let created = circle(
            &app,
            owner,
            json!({ "name": "Secret club", "is_private": true }),
        )
        .await;
        let id = created["id"].as_str().unwrap();
        let code = created["invite_code"].as_str().unwrap();
        assert_eq!(code.len(), 8);

        let (status, _) =
            send(&app, "GET", &format!("/api/community/{id}"), Some(guest), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let join = format!("/api/community/{id}/join");
        let (status, _) = send(
            &app,
            "POST",
            &join,
            Some(guest),
            Some(json!({ "invite_code": "WRONG123" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            "POST",
            &join,
            Some(guest),
            Some(json!({ "invite_code": code })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["role"], "member");

        let (status, _) = send(&app, "POST", &join, Some(guest), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            send(&app, "GET", &format!("/api/community/{id}"), Some(guest), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["members"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn messages_need_membership_and_report_stats() {
        let app = app().await;
        let owner = register(&app, "Talker").await;
        let stranger = register(&app, "Stranger").await;
        let created = circle(&app, owner, json!({ "name": "Chatters" })).await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/api/community/{id}/messages");

        let (status, _) =
            send(&app, "POST", &uri, Some(stranger), Some(json!({ "content": "hi" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) =
            send(&app, "POST", &uri, Some(owner), Some(json!({ "content": "  hello  " }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["content"], "hello");

        let (_, body) = send(&app, "GET", &format!("{uri}/stats"), Some(owner), None).await;
        assert_eq!(
            body["data"],
            json!({ "messages_today": 1, "daily_limit": 10, "remaining": 9 })
        );
    }

    #[tokio::test]
    async fn leave_and_leaderboard_opt_out() {
        let app = app().await;
        let owner = register(&app, "Leader").await;
        let member = register(&app, "Follower").await;
        let created = circle(&app, owner, json!({ "name": "Runners" })).await;
        let id = created["id"].as_str().unwrap();
        send(&app, "POST", &format!("/api/community/{id}/join"), Some(member), None).await;

        let (_, body) =
            send(&app, "GET", &format!("/api/community/{id}/leaderboard"), Some(owner), None)
                .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"][0]["rank"], 1);

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/community/{id}/leaderboard/opt-out"),
            Some(member),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["opt_out_of_leaderboard"], true);

        let (_, body) =
            send(&app, "GET", &format!("/api/community/{id}/leaderboard"), Some(owner), None)
                .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let leave = format!("/api/community/{id}/leave");
        let (status, _) = send(&app, "DELETE", &leave, Some(member), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &leave, Some(member), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn challenge_completion_awards_points_once() {
        let app = app().await;
        let admin = register(&app, "Admin").await;
        let member = register(&app, "Athlete").await;
        let created = circle(&app, admin, json!({ "name": "Challengers" })).await;
        let id = created["id"].as_str().unwrap();
        send(&app, "POST", &format!("/api/community/{id}/join"), Some(member), None).await;

        let start = Utc::now();
        let challenge = json!({
            "title": "Ten days",
            "type": "streak",
            "target": 10,
            "points_reward": 40,
            "start_date": start,
            "end_date": start + Duration::days(10),
        });
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/community/{id}/challenges"),
            Some(member),
            Some(challenge.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/community/{id}/challenges"),
            Some(admin),
            Some(challenge),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let challenge_id = body["data"]["id"].as_str().unwrap().to_string();
        let base = format!("/api/community/{id}/challenges/{challenge_id}");

        let (status, _) = send(
            &app,
            "PUT",
            &format!("{base}/progress"),
            Some(member),
            Some(json!({ "progress": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", &format!("{base}/join"), Some(member), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "POST", &format!("{base}/join"), Some(member), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(
            &app,
            "PUT",
            &format!("{base}/progress"),
            Some(member),
            Some(json!({ "progress": 10 })),
        )
        .await;
        assert_eq!(body["data"]["newly_completed"], true);
        assert_eq!(body["data"]["points_awarded"], 40);

        let (_, body) = send(
            &app,
            "PUT",
            &format!("{base}/progress"),
            Some(member),
            Some(json!({ "progress": 12 })),
        )
        .await;
        assert_eq!(body["data"]["newly_completed"], false);

        let (_, body) =
            send(&app, "GET", &format!("/api/community/{id}/leaderboard"), Some(admin), None)
                .await;
        assert_eq!(body["data"][0]["name"], "Athlete");
        assert_eq!(body["data"][0]["community_points"], 40);
    }

    #[tokio::test]
    async fn events_are_admin_only() {
        let app = app().await;
        let admin = register(&app, "Planner").await;
        let created = circle(&app, admin, json!({ "name": "Planners" })).await;
        let id = created["id"].as_str().unwrap();
        let start = Utc::now();

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/community/{id}/events"),
            Some(admin),
            Some(json!({
                "title": "Kickoff",
                "start_date": start,
                "end_date": start - Duration::hours(1),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/community/{id}/events"),
            Some(admin),
            Some(json!({
                "title": "Kickoff",
                "start_date": start,
                "end_date": start + Duration::hours(1),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["title"], "Kickoff");
    }
}
