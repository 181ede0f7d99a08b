use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, required_text};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleMessage {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

/// Message with its author's display name.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleMessageView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PostMessage {
    pub content: String,
}

impl PostMessage {
    pub fn validated(self) -> Result<Self, ValidationError> {
        Ok(Self {
            content: required_text("content", &self.content, 1, 500)?,
        })
    }
}

impl CircleMessage {
    pub async fn create(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CircleMessage>(
            r#"INSERT INTO circle_messages (id, circle_id, user_id, content, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               RETURNING *"#,
        )
        .bind(id)
        .bind(circle_id)
        .bind(user_id)
        .bind(content)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn count_since(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM circle_messages
               WHERE circle_id = ?1 AND user_id = ?2 AND created_at >= ?3"#,
        )
        .bind(circle_id)
        .bind(user_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }

    /// Most recent visible messages, returned oldest first.
    pub async fn recent_visible(
        pool: &SqlitePool,
        circle_id: Uuid,
        limit: i64,
    ) -> Result<Vec<CircleMessageView>, sqlx::Error> {
        let mut messages = sqlx::query_as::<_, CircleMessageView>(
            r#"SELECT m.id, m.user_id, u.name AS author_name, m.content, m.created_at
               FROM circle_messages m
               JOIN users u ON u.id = m.user_id
               WHERE m.circle_id = ?1 AND m.hidden = 0
               ORDER BY m.created_at DESC
               LIMIT ?2"#,
        )
        .bind(circle_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }
}
