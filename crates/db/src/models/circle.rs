use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, optional_text, required_text};

pub const DEFAULT_MAX_MEMBERS: i64 = 10;
pub const INVITE_CODE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display)]
#[sqlx(type_name = "member_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CommunityCircle {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub max_members: i64,
    pub is_private: bool,
    pub invite_code: Option<String>,
    pub max_messages_per_day: i64,
    pub leaderboard_update_day: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleMember {
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub opt_out_of_leaderboard: bool,
    pub community_points: i64,
}

/// Member row joined with the public parts of the user profile.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleMemberProfile {
    pub user_id: Uuid,
    pub name: String,
    pub level: i64,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub opt_out_of_leaderboard: bool,
    pub community_points: i64,
    pub show_on_leaderboard: bool,
}

/// Circle list entry with occupancy.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    #[ts(flatten)]
    pub circle: CommunityCircle,
    pub member_count: i64,
    pub is_member: bool,
}

impl CircleSummary {
    pub fn available_spots(&self) -> i64 {
        (self.circle.max_members - self.member_count).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateCircle {
    pub name: String,
    pub description: Option<String>,
    pub max_members: Option<i64>,
    pub is_private: Option<bool>,
}

impl CreateCircle {
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.max_members.is_some_and(|m| !(2..=50).contains(&m)) {
            return Err(ValidationError::new(
                "max_members",
                "must be between 2 and 50",
            ));
        }
        Ok(Self {
            name: required_text("name", &self.name, 3, 50)?,
            description: optional_text("description", self.description.as_deref(), 200)?,
            ..self
        })
    }
}

impl CommunityCircle {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, CommunityCircle>("SELECT * FROM community_circles WHERE id = ?1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn create<'e, E>(
        executor: E,
        created_by: Uuid,
        data: &CreateCircle,
        invite_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CommunityCircle>(
            r#"INSERT INTO community_circles
                   (id, name, description, created_by, max_members, is_private, invite_code,
                    created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
               RETURNING *"#,
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(created_by)
        .bind(data.max_members.unwrap_or(DEFAULT_MAX_MEMBERS))
        .bind(data.is_private.unwrap_or(false))
        .bind(invite_code)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Public circles plus private circles `user_id` belongs to, newest first.
    pub async fn list_visible(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<CircleSummary>, sqlx::Error> {
        sqlx::query_as::<_, CircleSummary>(
            r#"SELECT c.*,
                      (SELECT COUNT(*) FROM circle_members m WHERE m.circle_id = c.id)
                          AS member_count,
                      EXISTS(SELECT 1 FROM circle_members m
                             WHERE m.circle_id = c.id AND m.user_id = ?1) AS is_member
               FROM community_circles c
               WHERE c.is_private = 0
                  OR EXISTS(SELECT 1 FROM circle_members m
                            WHERE m.circle_id = c.id AND m.user_id = ?1)
               ORDER BY c.created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

impl CircleMember {
    pub async fn find<'e, E>(
        executor: E,
        circle_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, CircleMember>(
            "SELECT * FROM circle_members WHERE circle_id = ?1 AND user_id = ?2",
        )
        .bind(circle_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn count<'e, E>(executor: E, circle_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM circle_members WHERE circle_id = ?1")
            .bind(circle_id)
            .fetch_one(executor)
            .await
    }

    pub async fn add<'e, E>(
        executor: E,
        circle_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, CircleMember>(
            r#"INSERT INTO circle_members (circle_id, user_id, role, joined_at)
               VALUES (?1, ?2, ?3, ?4)
               RETURNING *"#,
        )
        .bind(circle_id)
        .bind(user_id)
        .bind(role)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn remove(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM circle_members WHERE circle_id = ?1 AND user_id = ?2")
            .bind(circle_id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Members with profile details, in join order.
    pub async fn profiles(
        pool: &SqlitePool,
        circle_id: Uuid,
    ) -> Result<Vec<CircleMemberProfile>, sqlx::Error> {
        sqlx::query_as::<_, CircleMemberProfile>(
            r#"SELECT m.user_id, u.name, u.level, m.role, m.joined_at,
                      m.opt_out_of_leaderboard, m.community_points, u.show_on_leaderboard
               FROM circle_members m
               JOIN users u ON u.id = m.user_id
               WHERE m.circle_id = ?1
               ORDER BY m.joined_at ASC"#,
        )
        .bind(circle_id)
        .fetch_all(pool)
        .await
    }

    pub async fn set_leaderboard_opt_out(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
        opt_out: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE circle_members SET opt_out_of_leaderboard = ?3
               WHERE circle_id = ?1 AND user_id = ?2"#,
        )
        .bind(circle_id)
        .bind(user_id)
        .bind(opt_out)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn add_points<'e, E>(
        executor: E,
        circle_id: Uuid,
        user_id: Uuid,
        points: i64,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"UPDATE circle_members SET community_points = community_points + ?3
               WHERE circle_id = ?1 AND user_id = ?2"#,
        )
        .bind(circle_id)
        .bind(user_id)
        .bind(points)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
