use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::DeploymentImpl;

pub mod ai;
pub mod analytics;
pub mod community;
pub mod gamification;
pub mod habits;
pub mod health;
pub mod users;

pub fn router(deployment: DeploymentImpl) -> Router {
    let api_routes = Router::new()
        .merge(health::router(&deployment))
        .merge(users::router(&deployment))
        .merge(habits::router(&deployment))
        .merge(gamification::router(&deployment))
        .merge(analytics::router(&deployment))
        .merge(community::router(&deployment))
        .merge(ai::router(&deployment));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(deployment)
}
