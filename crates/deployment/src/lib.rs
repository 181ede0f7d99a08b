//! Wiring of the database, configuration and long-lived services behind one handle.

use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use services::services::{
    ai_provider::AiProviderError,
    coach::CoachService,
    config::{Config, ConfigError},
    database_validator::{DatabaseValidationError, DatabaseValidator},
    streak_maintenance::StreakMaintenanceService,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    AiProvider(#[from] AiProviderError),
    #[error(transparent)]
    DatabaseValidation(#[from] DatabaseValidationError),
}

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new(config: Config) -> Result<Self, DeploymentError>;

    fn db(&self) -> &DBService;

    fn config(&self) -> &Config;

    fn coach(&self) -> &CoachService;

    /// Starts the periodic jobs that keep derived data fresh.
    async fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            StreakMaintenanceService::spawn(
                self.db().clone(),
                self.config().streak_sweep_interval,
            )
            .await,
        ]
    }
}

#[derive(Clone)]
pub struct LocalDeployment {
    db: DBService,
    config: Arc<Config>,
    coach: CoachService,
}

impl LocalDeployment {
    /// Assembles a deployment from already constructed parts.
    pub fn from_parts(db: DBService, config: Config, coach: CoachService) -> Self {
        Self {
            db,
            config: Arc::new(config),
            coach,
        }
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new(config: Config) -> Result<Self, DeploymentError> {
        let db = DBService::new(&config.database_url).await?;

        let validation = DatabaseValidator::new(db.pool.clone()).validate().await?;
        if validation.is_ok() {
            info!("{}", validation.summary());
        } else {
            warn!("{}", validation.summary());
        }

        let coach = CoachService::from_config(&config)?;
        Ok(Self::from_parts(db, config, coach))
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn coach(&self) -> &CoachService {
        &self.coach
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_deployment_exposes_its_parts() {
        let db = DBService::new_in_memory().await.unwrap();
        let deployment = LocalDeployment::from_parts(
            db,
            Config::default(),
            CoachService::new(None, "test-model"),
        );
        assert_eq!(deployment.config().port, 3001);
        assert!(!deployment.coach().status().available);

        let handles = deployment.spawn_background_tasks().await;
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.abort();
        }
    }
}
