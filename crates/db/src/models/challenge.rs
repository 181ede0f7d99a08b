use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{ValidationError, optional_text, required_text};

pub const DEFAULT_POINTS_REWARD: i64 = 50;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display)]
#[sqlx(type_name = "challenge_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChallengeType {
    Streak,
    Completion,
    Consistency,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CircleChallenge {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub challenge_type: ChallengeType,
    pub target: i64,
    pub points_reward: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ChallengeParticipant {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub progress: i64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChallengeWithParticipants {
    #[serde(flatten)]
    #[ts(flatten)]
    pub challenge: CircleChallenge,
    pub participants: Vec<ChallengeParticipant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateChallenge {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub target: i64,
    pub points_reward: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl CreateChallenge {
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.target < 1 {
            return Err(ValidationError::new("target", "must be a positive number"));
        }
        if self.points_reward.is_some_and(|p| p < 1) {
            return Err(ValidationError::new("points_reward", "must be a positive number"));
        }
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

impl CircleChallenge {
    pub async fn find_in_circle<'e, E>(
        executor: E,
        circle_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, CircleChallenge>(
            "SELECT * FROM circle_challenges WHERE id = ?1 AND circle_id = ?2",
        )
        .bind(id)
        .bind(circle_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        circle_id: Uuid,
        created_by: Uuid,
        data: &CreateChallenge,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, CircleChallenge>(
            r#"INSERT INTO circle_challenges
                   (id, circle_id, title, description, challenge_type, target, points_reward,
                    start_date, end_date, created_by, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               RETURNING *"#,
        )
        .bind(id)
        .bind(circle_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.challenge_type)
        .bind(data.target)
        .bind(data.points_reward.unwrap_or(DEFAULT_POINTS_REWARD))
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(created_by)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_circle_with_participants(
        pool: &SqlitePool,
        circle_id: Uuid,
    ) -> Result<Vec<ChallengeWithParticipants>, sqlx::Error> {
        let challenges = sqlx::query_as::<_, CircleChallenge>(
            "SELECT * FROM circle_challenges WHERE circle_id = ?1 ORDER BY start_date ASC",
        )
        .bind(circle_id)
        .fetch_all(pool)
        .await?;

        let mut result = Vec::with_capacity(challenges.len());
        for challenge in challenges {
            let participants = ChallengeParticipant::find_by_challenge(pool, challenge.id).await?;
            result.push(ChallengeWithParticipants {
                challenge,
                participants,
            });
        }
        Ok(result)
    }
}

impl ChallengeParticipant {
    pub async fn find<'e, E>(
        executor: E,
        challenge_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChallengeParticipant>(
            "SELECT * FROM challenge_participants WHERE challenge_id = ?1 AND user_id = ?2",
        )
        .bind(challenge_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_challenge(
        pool: &SqlitePool,
        challenge_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ChallengeParticipant>(
            r#"SELECT * FROM challenge_participants
               WHERE challenge_id = ?1
               ORDER BY progress DESC, joined_at ASC"#,
        )
        .bind(challenge_id)
        .fetch_all(pool)
        .await
    }

    pub async fn join(
        pool: &SqlitePool,
        challenge_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ChallengeParticipant>(
            r#"INSERT INTO challenge_participants (challenge_id, user_id, joined_at)
               VALUES (?1, ?2, ?3)
               RETURNING *"#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn update_progress<'e, E>(
        executor: E,
        challenge_id: Uuid,
        user_id: Uuid,
        progress: i64,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ChallengeParticipant>(
            r#"UPDATE challenge_participants
               SET progress = ?3,
                   completed = CASE WHEN ?4 IS NOT NULL THEN 1 ELSE completed END,
                   completed_at = COALESCE(completed_at, ?4)
               WHERE challenge_id = ?1 AND user_id = ?2
               RETURNING *"#,
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(progress)
        .bind(completed_at)
        .fetch_one(executor)
        .await
    }
}
