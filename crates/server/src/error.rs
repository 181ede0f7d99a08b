use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::ValidationError;
use services::services::{
    analytics::AnalyticsError, coach::CoachError, community::CommunityError,
    gamification::GamificationError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gamification(#[from] GamificationError),
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
    #[error(transparent)]
    Community(#[from] CommunityError),
    #[error(transparent)]
    Coach(#[from] CoachError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Database(err) => {
                if err.as_database_error().is_some_and(|e| e.is_unique_violation()) {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gamification(err) => match err {
                GamificationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                GamificationError::HabitNotFound | GamificationError::UserNotFound => {
                    StatusCode::NOT_FOUND
                }
                GamificationError::AlreadyCompleted => StatusCode::CONFLICT,
                GamificationError::Validation(_)
                | GamificationError::HabitArchived
                | GamificationError::FutureDate
                | GamificationError::NoForgivenessTokens
                | GamificationError::InvalidXpAmount
                | GamificationError::InvalidXpSource(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Analytics(err) => match err {
                AnalyticsError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AnalyticsError::InvalidMonth(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::Community(err) => match err {
                CommunityError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CommunityError::Validation(_) => StatusCode::BAD_REQUEST,
                CommunityError::CircleNotFound
                | CommunityError::ChallengeNotFound
                | CommunityError::MembershipNotFound
                | CommunityError::NotParticipant => StatusCode::NOT_FOUND,
                CommunityError::NotMember
                | CommunityError::NotAdmin
                | CommunityError::InvalidInviteCode => StatusCode::FORBIDDEN,
                CommunityError::AlreadyMember
                | CommunityError::CircleFull
                | CommunityError::AlreadyJoined => StatusCode::CONFLICT,
                CommunityError::MessageLimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
            },
            ApiError::Coach(err) => match err {
                CoachError::Database(_) | CoachError::Analytics(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                CoachError::Provider(_) => StatusCode::BAD_GATEWAY,
                CoachError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                CoachError::OptedOut => StatusCode::FORBIDDEN,
                CoachError::HabitNotFound => StatusCode::NOT_FOUND,
                CoachError::InsufficientData(_) => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            match status {
                StatusCode::BAD_GATEWAY => "AI provider request failed".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            match &self {
                ApiError::Database(_) => "Resource already exists".to_string(),
                other => other.to_string(),
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
