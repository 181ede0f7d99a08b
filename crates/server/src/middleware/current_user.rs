//! Resolves the calling user from the `X-User-Id` header set by the upstream gateway.

use axum::{extract::FromRequestParts, http::request::Parts};
use db::models::user::User;
use deployment::Deployment;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError};

pub const USER_ID_HEADER: &str = "x-user-id";

/// The active user making the request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<DeploymentImpl> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        deployment: &DeploymentImpl,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing or invalid user id".to_string()))?;

        let user = User::find_active(&deployment.db().pool, user_id)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".to_string()))?;

        Ok(CurrentUser(user))
    }
}
