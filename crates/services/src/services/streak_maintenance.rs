//! Background sweep that resets streaks of habits nobody completed yesterday.

use std::time::Duration;

use chrono::Utc;
use db::DBService;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::gamification::GamificationService;

pub struct StreakMaintenanceService {
    db: DBService,
    poll_interval: Duration,
}

impl StreakMaintenanceService {
    pub async fn spawn(db: DBService, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        let service = Self { db, poll_interval };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting streak maintenance service with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            match GamificationService::reset_lapsed_streaks(&self.db.pool, Utc::now()).await {
                Ok(0) => debug!("Streak maintenance: no lapsed streaks"),
                Ok(count) => info!(count, "Streak maintenance: reset lapsed streaks"),
                Err(e) => error!("Error resetting lapsed streaks: {}", e),
            }
        }
    }
}
