pub mod ai_provider;
pub mod analytics;
pub mod coach;
pub mod community;
pub mod config;
pub mod database_validator;
pub mod gamification;
pub mod streak_maintenance;
