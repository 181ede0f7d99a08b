use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, completion::Completion, is_clock_time, optional_text, required_text};

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
    Default,
)]
#[sqlx(type_name = "habit_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HabitCategory {
    Health,
    Fitness,
    Productivity,
    Learning,
    Mindfulness,
    Social,
    Creativity,
    Finance,
    #[default]
    Other,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "habit_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HabitFrequency {
    #[default]
    Daily,
    Weekly,
    Custom,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Habit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: HabitCategory,
    pub frequency: HabitFrequency,
    pub reminder_time: Option<String>,
    pub reminder_enabled: bool,
    pub color: String,
    pub icon: String,
    pub active: bool,
    pub archived: bool,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub total_completions: i64,
    pub consistency_rate: i64,
    pub last_completed_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A habit together with its most recent completions.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct HabitWithCompletions {
    #[serde(flatten)]
    #[ts(flatten)]
    pub habit: Habit,
    pub completions: Vec<Completion>,
}

/// Statistics derived from a habit's completion history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HabitStats {
    pub total_completions: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub consistency_rate: i64,
    pub last_completed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct HabitFilter {
    pub category: Option<HabitCategory>,
    pub active: Option<bool>,
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateHabit {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<HabitCategory>,
    pub frequency: Option<HabitFrequency>,
    pub reminder_time: Option<String>,
    pub reminder_enabled: Option<bool>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl CreateHabit {
    pub fn validated(self) -> Result<Self, ValidationError> {
        let reminder_time = validate_reminder(self.reminder_time)?;
        Ok(Self {
            name: required_text("name", &self.name, 1, 100)?,
            description: optional_text("description", self.description.as_deref(), 500)?,
            color: validate_color(self.color)?,
            icon: optional_text("icon", self.icon.as_deref(), 50)?,
            reminder_time,
            ..self
        })
    }
}

/// Editable fields of a habit. Statistics and ownership are not patchable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateHabit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<HabitCategory>,
    pub frequency: Option<HabitFrequency>,
    pub reminder_time: Option<String>,
    pub reminder_enabled: Option<bool>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub active: Option<bool>,
    pub archived: Option<bool>,
}

impl UpdateHabit {
    pub fn apply_to(self, habit: &mut Habit) -> Result<(), ValidationError> {
        if let Some(name) = self.name {
            habit.name = required_text("name", &name, 1, 100)?;
        }
        if let Some(description) = self.description {
            habit.description = optional_text("description", Some(&description), 500)?;
        }
        if let Some(category) = self.category {
            habit.category = category;
        }
        if let Some(frequency) = self.frequency {
            habit.frequency = frequency;
        }
        if self.reminder_time.is_some() {
            habit.reminder_time = validate_reminder(self.reminder_time)?;
        }
        if let Some(reminder_enabled) = self.reminder_enabled {
            habit.reminder_enabled = reminder_enabled;
        }
        if let Some(color) = validate_color(self.color)? {
            habit.color = color;
        }
        if let Some(icon) = optional_text("icon", self.icon.as_deref(), 50)? {
            habit.icon = icon;
        }
        if let Some(active) = self.active {
            habit.active = active;
        }
        if let Some(archived) = self.archived {
            habit.archived = archived;
        }
        Ok(())
    }
}

fn validate_reminder(value: Option<String>) -> Result<Option<String>, ValidationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(time) if is_clock_time(time) => Ok(Some(time.to_string())),
        Some(_) => Err(ValidationError::new("reminder_time", "must be HH:MM")),
    }
}

fn validate_color(value: Option<String>) -> Result<Option<String>, ValidationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(color)
            if color.len() == 7
                && color.starts_with('#')
                && color[1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(Some(color.to_string()))
        }
        Some(_) => Err(ValidationError::new("color", "must be a #RRGGBB hex color")),
    }
}

impl Habit {
    /// Habit owned by `user_id`; habits of other users are indistinguishable from missing ones.
    pub async fn find_for_user<'e, E>(
        executor: E,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Habit>("SELECT * FROM habits WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
        filter: &HabitFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Habit>(
            r#"SELECT * FROM habits
               WHERE user_id = ?1
                 AND (?2 IS NULL OR category = ?2)
                 AND (?3 IS NULL OR active = ?3)
                 AND (?4 IS NULL OR archived = ?4)
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .bind(filter.category)
        .bind(filter.active)
        .bind(filter.archived)
        .fetch_all(pool)
        .await
    }

    pub async fn find_active_by_user(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let filter = HabitFilter {
            active: Some(true),
            ..Default::default()
        };
        Self::find_by_user(pool, user_id, &filter).await
    }

    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        data: &CreateHabit,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, Habit>(
            r#"INSERT INTO habits
                   (id, user_id, name, description, category, frequency, reminder_time,
                    reminder_enabled, color, icon, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                       COALESCE(?9, '#3B82F6'), COALESCE(?10, 'star'), ?11, ?11)
               RETURNING *"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.category.unwrap_or_default())
        .bind(data.frequency.unwrap_or_default())
        .bind(&data.reminder_time)
        .bind(data.reminder_enabled.unwrap_or(false))
        .bind(&data.color)
        .bind(&data.icon)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Persists the editable fields of `habit`.
    pub async fn save_details(
        pool: &SqlitePool,
        habit: &Habit,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Habit>(
            r#"UPDATE habits SET
                   name = ?3, description = ?4, category = ?5, frequency = ?6,
                   reminder_time = ?7, reminder_enabled = ?8, color = ?9, icon = ?10,
                   active = ?11, archived = ?12, updated_at = ?13
               WHERE id = ?1 AND user_id = ?2
               RETURNING *"#,
        )
        .bind(habit.id)
        .bind(habit.user_id)
        .bind(&habit.name)
        .bind(&habit.description)
        .bind(habit.category)
        .bind(habit.frequency)
        .bind(&habit.reminder_time)
        .bind(habit.reminder_enabled)
        .bind(&habit.color)
        .bind(&habit.icon)
        .bind(habit.active)
        .bind(habit.archived)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn archive(
        pool: &SqlitePool,
        id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Habit>(
            r#"UPDATE habits SET archived = 1, active = 0, updated_at = ?3
               WHERE id = ?1 AND user_id = ?2
               RETURNING *"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(now)
        .fetch_optional(pool)
        .await
    }

    /// Writes derived statistics.
    pub async fn update_stats<'e, E>(
        executor: E,
        id: Uuid,
        stats: &HabitStats,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Habit>(
            r#"UPDATE habits SET
                   total_completions = ?2, current_streak = ?3, longest_streak = ?4,
                   consistency_rate = ?5, last_completed_on = ?6, updated_at = ?7
               WHERE id = ?1
               RETURNING *"#,
        )
        .bind(id)
        .bind(stats.total_completions)
        .bind(stats.current_streak)
        .bind(stats.longest_streak)
        .bind(stats.consistency_rate)
        .bind(stats.last_completed_on)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Habits still showing a streak although their last completion is before `cutoff`.
    pub async fn find_with_lapsed_streaks(
        pool: &SqlitePool,
        cutoff: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Habit>(
            r#"SELECT * FROM habits
               WHERE current_streak > 0
                 AND (last_completed_on IS NULL OR last_completed_on < ?1)"#,
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid, user_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM habits WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(name: &str) -> CreateHabit {
        CreateHabit {
            name: name.to_string(),
            description: None,
            category: None,
            frequency: None,
            reminder_time: None,
            reminder_enabled: None,
            color: None,
            icon: None,
        }
    }

    #[test]
    fn name_is_required_and_bounded() {
        assert!(create("   ").validated().is_err());
        assert!(create(&"x".repeat(101)).validated().is_err());
        assert_eq!(create("  Read  ").validated().unwrap().name, "Read");
    }

    #[test]
    fn color_must_be_hex() {
        let mut data = create("Read");
        data.color = Some("blue".into());
        assert_eq!(data.validated().unwrap_err().field, "color");

        let mut data = create("Read");
        data.color = Some("#10b981".into());
        assert_eq!(data.validated().unwrap().color.as_deref(), Some("#10b981"));
    }

    #[test]
    fn category_parses_from_lowercase() {
        assert_eq!("mindfulness".parse::<HabitCategory>().unwrap(), HabitCategory::Mindfulness);
        assert!("sleeping".parse::<HabitCategory>().is_err());
    }
}
