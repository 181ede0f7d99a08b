use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, is_clock_time, required_text};

pub const MAX_FORGIVENESS_TOKENS: i64 = 2;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,3})+$").expect("email pattern is valid")
});

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "theme", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS, PartialEq)]
pub struct NotificationPreferences {
    #[sqlx(rename = "notify_push")]
    pub push: bool,
    #[sqlx(rename = "notify_email")]
    pub email: bool,
    #[sqlx(rename = "notify_in_app")]
    pub in_app: bool,
    pub reminder_time: String,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            push: true,
            email: true,
            in_app: true,
            reminder_time: "09:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS, PartialEq)]
pub struct PrivacySettings {
    pub share_with_community: bool,
    pub allow_ai_personalization: bool,
    pub show_on_leaderboard: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            share_with_community: true,
            allow_ai_personalization: true,
            show_on_leaderboard: true,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub timezone: String,
    pub level: i64,
    pub total_xp: i64,
    pub forgiveness_tokens: i64,
    pub ai_opt_out: bool,
    pub theme: Theme,
    #[sqlx(flatten)]
    pub notification_preferences: NotificationPreferences,
    #[sqlx(flatten)]
    pub privacy_settings: PrivacySettings,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub soft_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether AI features may use this user's data.
    pub fn allows_ai(&self) -> bool {
        !self.ai_opt_out && self.privacy_settings.allow_ai_personalization
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub timezone: Option<String>,
}

impl CreateUser {
    /// Normalizes the payload: trimmed name, lower-cased email, default timezone.
    pub fn validated(self) -> Result<Self, ValidationError> {
        let name = required_text("name", &self.name, 1, 100)?;
        let email = self.email.trim().to_lowercase();
        if !EMAIL_PATTERN.is_match(&email) {
            return Err(ValidationError::new("email", "please enter a valid email"));
        }
        let timezone = self
            .timezone
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty())
            .or_else(|| Some("UTC".to_string()));
        Ok(Self {
            name,
            email,
            timezone,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub theme: Option<Theme>,
    pub ai_opt_out: Option<bool>,
    pub notification_preferences: Option<NotificationPreferences>,
    pub privacy_settings: Option<PrivacySettings>,
}

impl UpdateUser {
    /// Applies the update to `user` in memory, validating each supplied field.
    pub fn apply_to(self, user: &mut User) -> Result<(), ValidationError> {
        if let Some(name) = self.name {
            user.name = required_text("name", &name, 1, 100)?;
        }
        if let Some(timezone) = self.timezone {
            let timezone = timezone.trim();
            if timezone.is_empty() {
                return Err(ValidationError::new("timezone", "must not be empty"));
            }
            user.timezone = timezone.to_string();
        }
        if let Some(theme) = self.theme {
            user.theme = theme;
        }
        if let Some(ai_opt_out) = self.ai_opt_out {
            user.ai_opt_out = ai_opt_out;
        }
        if let Some(prefs) = self.notification_preferences {
            if !is_clock_time(&prefs.reminder_time) {
                return Err(ValidationError::new(
                    "notification_preferences.reminder_time",
                    "must be HH:MM",
                ));
            }
            user.notification_preferences = prefs;
        }
        if let Some(privacy) = self.privacy_settings {
            user.privacy_settings = privacy;
        }
        Ok(())
    }
}

impl User {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Active, not soft-deleted user.
    pub async fn find_active(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = ?1 AND is_active = 1 AND soft_deleted = 0",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(
        pool: &SqlitePool,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(pool)
            .await
    }

    /// Inserts a validated user with default gamification and settings.
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateUser,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, name, email, timezone, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?5)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(data.timezone.as_deref().unwrap_or("UTC"))
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Persists the profile and settings fields of `user`.
    pub async fn save_profile(
        pool: &SqlitePool,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let prefs = &user.notification_preferences;
        let privacy = &user.privacy_settings;
        sqlx::query_as::<_, User>(
            r#"UPDATE users SET
                   name = ?2, timezone = ?3, theme = ?4, ai_opt_out = ?5,
                   notify_push = ?6, notify_email = ?7, notify_in_app = ?8, reminder_time = ?9,
                   share_with_community = ?10, allow_ai_personalization = ?11,
                   show_on_leaderboard = ?12, updated_at = ?13
               WHERE id = ?1
               RETURNING *"#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.timezone)
        .bind(user.theme)
        .bind(user.ai_opt_out)
        .bind(prefs.push)
        .bind(prefs.email)
        .bind(prefs.in_app)
        .bind(&prefs.reminder_time)
        .bind(privacy.share_with_community)
        .bind(privacy.allow_ai_personalization)
        .bind(privacy.show_on_leaderboard)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    /// Writes level, XP and forgiveness tokens computed by the gamification engine.
    pub async fn update_progress<'e, E>(
        executor: E,
        id: Uuid,
        level: i64,
        total_xp: i64,
        forgiveness_tokens: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"UPDATE users
               SET level = ?2, total_xp = ?3, forgiveness_tokens = ?4, updated_at = ?5
               WHERE id = ?1"#,
        )
        .bind(id)
        .bind(level)
        .bind(total_xp)
        .bind(forgiveness_tokens.clamp(0, MAX_FORGIVENESS_TOKENS))
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn touch_last_login(
        pool: &SqlitePool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete(
        pool: &SqlitePool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET soft_deleted = 1, is_active = 0, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }
}
