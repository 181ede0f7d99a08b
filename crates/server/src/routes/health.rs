use axum::{Router, response::Json as ResponseJson, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::DeploymentImpl;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

pub async fn health() -> ResponseJson<ApiResponse<HealthStatus>> {
    ResponseJson(ApiResponse::success_with_message(
        HealthStatus {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        "HabitForge API is running",
    ))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::{app, send};

    #[tokio::test]
    async fn health_needs_no_identity() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "HabitForge API is running");
        assert!(body["data"]["timestamp"].is_string());
    }
}
