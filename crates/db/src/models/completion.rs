use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, optional_text};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Completion {
    pub id: Uuid,
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub completed_on: NaiveDate,
    pub device_timezone: String,
    pub xp_earned: i64,
    pub notes: Option<String>,
    pub mood: Option<i64>,
    pub difficulty: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub forgiveness_used: bool,
    pub edited_flag: bool,
    pub created_at: DateTime<Utc>,
}

/// Row to insert. XP is filled in once the engine has computed it.
#[derive(Debug, Clone)]
pub struct NewCompletion {
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub device_timezone: String,
    pub xp_earned: i64,
    pub notes: Option<String>,
    pub mood: Option<i64>,
    pub difficulty: Option<i64>,
    pub duration_minutes: Option<i64>,
    pub forgiveness_used: bool,
    pub edited_flag: bool,
}

/// Request body for marking a habit complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct CompleteHabit {
    pub date: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub notes: Option<String>,
    pub mood: Option<i64>,
    pub difficulty: Option<i64>,
    pub duration: Option<i64>,
}

impl CompleteHabit {
    pub fn validated(self) -> Result<Self, ValidationError> {
        for (field, value) in [("mood", self.mood), ("difficulty", self.difficulty)] {
            if value.is_some_and(|v| !(1..=5).contains(&v)) {
                return Err(ValidationError::new(field, "must be between 1 and 5"));
            }
        }
        if self.duration.is_some_and(|d| d < 0) {
            return Err(ValidationError::new("duration", "must not be negative"));
        }
        Ok(Self {
            notes: optional_text("notes", self.notes.as_deref(), 500)?,
            ..self
        })
    }
}

/// Completion count and XP for one calendar day.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub completions: i64,
    pub xp_earned: i64,
}

impl Completion {
    pub async fn create<'e, E>(
        executor: E,
        data: &NewCompletion,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Completion>(
            r#"INSERT INTO completions
                   (id, habit_id, user_id, completed_at, completed_on, device_timezone, xp_earned,
                    notes, mood, difficulty, duration_minutes, forgiveness_used, edited_flag,
                    created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
               RETURNING *"#,
        )
        .bind(id)
        .bind(data.habit_id)
        .bind(data.user_id)
        .bind(data.completed_at)
        .bind(utils::date::day_of(data.completed_at))
        .bind(&data.device_timezone)
        .bind(data.xp_earned)
        .bind(&data.notes)
        .bind(data.mood)
        .bind(data.difficulty)
        .bind(data.duration_minutes)
        .bind(data.forgiveness_used)
        .bind(data.edited_flag)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn set_xp<'e, E>(executor: E, id: Uuid, xp_earned: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE completions SET xp_earned = ?2 WHERE id = ?1")
            .bind(id)
            .bind(xp_earned)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn exists_on_day<'e, E>(
        executor: E,
        habit_id: Uuid,
        day: NaiveDate,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM completions WHERE habit_id = ?1 AND completed_on = ?2)",
        )
        .bind(habit_id)
        .bind(day)
        .fetch_one(executor)
        .await
    }

    /// Distinct completion days of a habit, oldest first.
    pub async fn days_for_habit<'e, E>(
        executor: E,
        habit_id: Uuid,
    ) -> Result<Vec<NaiveDate>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, NaiveDate>(
            r#"SELECT DISTINCT completed_on FROM completions
               WHERE habit_id = ?1
               ORDER BY completed_on ASC"#,
        )
        .bind(habit_id)
        .fetch_all(executor)
        .await
    }

    pub async fn find_recent_for_habit(
        pool: &SqlitePool,
        habit_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Completion>(
            r#"SELECT * FROM completions
               WHERE habit_id = ?1
               ORDER BY completed_at DESC
               LIMIT ?2"#,
        )
        .bind(habit_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Page of a habit's completions on or after `since`, newest first, plus the total.
    pub async fn page_for_habit(
        pool: &SqlitePool,
        habit_id: Uuid,
        since: NaiveDate,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let completions = sqlx::query_as::<_, Completion>(
            r#"SELECT * FROM completions
               WHERE habit_id = ?1 AND completed_on >= ?2
               ORDER BY completed_at DESC
               LIMIT ?3 OFFSET ?4"#,
        )
        .bind(habit_id)
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM completions WHERE habit_id = ?1 AND completed_on >= ?2",
        )
        .bind(habit_id)
        .bind(since)
        .fetch_one(pool)
        .await?;
        Ok((completions, total))
    }

    /// All of a user's completions between two days inclusive, newest first.
    pub async fn find_for_user_between(
        pool: &SqlitePool,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Completion>(
            r#"SELECT * FROM completions
               WHERE user_id = ?1 AND completed_on BETWEEN ?2 AND ?3
               ORDER BY completed_at DESC"#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }

    /// Per-day totals for a user between two days inclusive, oldest first.
    pub async fn daily_totals_for_user(
        pool: &SqlitePool,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyTotal>, sqlx::Error> {
        sqlx::query_as::<_, DailyTotal>(
            r#"SELECT completed_on AS day,
                      COUNT(*) AS completions,
                      COALESCE(SUM(xp_earned), 0) AS xp_earned
               FROM completions
               WHERE user_id = ?1 AND completed_on BETWEEN ?2 AND ?3
               GROUP BY completed_on
               ORDER BY completed_on ASC"#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
    }

    /// Ids of habits the user completed on `day`.
    pub async fn habit_ids_on_day(
        pool: &SqlitePool,
        user_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT habit_id FROM completions WHERE user_id = ?1 AND completed_on = ?2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_all(pool)
        .await
    }

    pub async fn delete_for_habit<'e, E>(executor: E, habit_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM completions WHERE habit_id = ?1")
            .bind(habit_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_payload_bounds() {
        let bad_mood = CompleteHabit {
            mood: Some(6),
            ..Default::default()
        };
        assert_eq!(bad_mood.validated().unwrap_err().field, "mood");

        let bad_duration = CompleteHabit {
            duration: Some(-1),
            ..Default::default()
        };
        assert_eq!(bad_duration.validated().unwrap_err().field, "duration");

        let ok = CompleteHabit {
            difficulty: Some(5),
            notes: Some("  felt great ".into()),
            ..Default::default()
        };
        assert_eq!(ok.validated().unwrap().notes.as_deref(), Some("felt great"));
    }
}
