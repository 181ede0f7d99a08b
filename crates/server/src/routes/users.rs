use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use db::models::user::{CreateUser, UpdateUser, User};
use deployment::Deployment;
use tracing::info;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::CurrentUser};

/// Register a new profile
pub async fn create_user(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateUser>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<User>>), ApiError> {
    let pool = &deployment.db().pool;
    let payload = payload.validated()?;
    if User::find_by_email(pool, &payload.email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".to_string()));
    }

    let user = User::create(pool, &payload, Utc::now()).await?;
    info!(user_id = %user.id, "Created user");
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(user))))
}

pub async fn get_me(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(mut user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let now = Utc::now();
    User::touch_last_login(&deployment.db().pool, user.id, now).await?;
    user.last_login = Some(now);
    Ok(ResponseJson(ApiResponse::success(user)))
}

/// Update profile and settings. Level, XP and tokens are not part of the payload.
pub async fn update_me(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(mut user): CurrentUser,
    Json(payload): Json<UpdateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    payload.apply_to(&mut user)?;
    let user = User::save_profile(&deployment.db().pool, &user, Utc::now()).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        user,
        "Profile updated",
    )))
}

pub async fn delete_me(
    State(deployment): State<DeploymentImpl>,
    CurrentUser(user): CurrentUser,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    User::soft_delete(&deployment.db().pool, user.id, Utc::now()).await?;
    info!(user_id = %user.id, "Soft-deleted user");
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Account deleted",
    )))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/users",
        Router::new()
            .route("/", post(create_user))
            .route("/me", get(get_me).patch(update_me).delete(delete_me)),
    )
}
