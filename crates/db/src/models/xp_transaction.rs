use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Why XP was granted.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display)]
#[sqlx(type_name = "xp_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum XpSource {
    HabitCompletion,
    LevelBonus,
    Forgiveness,
    Challenge,
    Bonus,
}

/// Ledger entry. The ledger is append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct XpTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub habit_id: Option<Uuid>,
    pub amount: i64,
    pub source: XpSource,
    pub description: String,
    pub metadata: Option<String>, // JSON-serialized
    pub created_at: DateTime<Utc>,
}

impl XpTransaction {
    pub fn parsed_metadata(&self) -> Option<serde_json::Value> {
        self.metadata
            .as_ref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

#[derive(Debug, Clone)]
pub struct NewXpTransaction {
    pub user_id: Uuid,
    pub habit_id: Option<Uuid>,
    pub amount: i64,
    pub source: XpSource,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

impl XpTransaction {
    pub async fn create<'e, E>(
        executor: E,
        data: &NewXpTransaction,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        let metadata = data.metadata.as_ref().map(|m| m.to_string());
        sqlx::query_as::<_, XpTransaction>(
            r#"INSERT INTO xp_transactions
                   (id, user_id, habit_id, amount, source, description, metadata, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.user_id)
        .bind(data.habit_id)
        .bind(data.amount)
        .bind(data.source)
        .bind(&data.description)
        .bind(metadata)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, XpTransaction>(
            r#"SELECT * FROM xp_transactions
               WHERE user_id = ?1
               ORDER BY created_at DESC
               LIMIT ?2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn count_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM xp_transactions WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(pool)
            .await
    }

    pub async fn sum_since(
        pool: &SqlitePool,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COALESCE(SUM(amount), 0) FROM xp_transactions
               WHERE user_id = ?1 AND created_at >= ?2"#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }
}
