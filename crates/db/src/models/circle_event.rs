use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, optional_text, required_text};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleEvent {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateCircleEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl CreateCircleEvent {
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.end_date < self.start_date {
            return Err(ValidationError::new("end_date", "must not be before start_date"));
        }
        Ok(Self {
            title: required_text("title", &self.title, 3, 100)?,
            description: optional_text("description", self.description.as_deref(), 500)?,
            ..self
        })
    }
}

impl CircleEvent {
    pub async fn create(
        pool: &SqlitePool,
        circle_id: Uuid,
        created_by: Uuid,
        data: &CreateCircleEvent,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CircleEvent>(
            r#"INSERT INTO circle_events
                   (id, circle_id, title, description, start_date, end_date, created_by, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               RETURNING *"#,
        )
        .bind(id)
        .bind(circle_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(created_by)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_circle(
        pool: &SqlitePool,
        circle_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CircleEvent>(
            "SELECT * FROM circle_events WHERE circle_id = ?1 ORDER BY start_date ASC",
        )
        .bind(circle_id)
        .fetch_all(pool)
        .await
    }
}
