//! Accountability circles: membership, chat, leaderboards, events and challenges.

use chrono::{DateTime, Utc};
use db::models::{
    ValidationError,
    challenge::{
        ChallengeParticipant, ChallengeWithParticipants, CircleChallenge, CreateChallenge,
    },
    circle::{
        CircleMember, CircleMemberProfile, CircleSummary, CommunityCircle, CreateCircle,
        INVITE_CODE_LEN, MemberRole,
    },
    circle_event::{CircleEvent, CreateCircleEvent},
    circle_message::{CircleMessage, CircleMessageView, PostMessage},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::{
    date::{day_of, start_of_day},
    text::invite_code,
};
use uuid::Uuid;

pub const RECENT_MESSAGE_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Circle not found")]
    CircleNotFound,
    #[error("Challenge not found")]
    ChallengeNotFound,
    #[error("You are not a member of this circle")]
    NotMember,
    #[error("Membership not found")]
    MembershipNotFound,
    #[error("Only circle admins can do this")]
    NotAdmin,
    #[error("You are already a member of this circle")]
    AlreadyMember,
    #[error("Circle is full")]
    CircleFull,
    #[error("Invalid invite code")]
    InvalidInviteCode,
    #[error("Daily message limit of {0} reached")]
    MessageLimitReached(i64),
    #[error("You have already joined this challenge")]
    AlreadyJoined,
    #[error("You are not participating in this challenge")]
    NotParticipant,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CircleListing {
    #[serde(flatten)]
    #[ts(flatten)]
    pub summary: CircleSummary,
    pub available_spots: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CircleDetails {
    pub circle: CommunityCircle,
    pub is_member: bool,
    pub role: Option<MemberRole>,
    pub members: Vec<CircleMemberProfile>,
    pub messages: Vec<CircleMessageView>,
    pub events: Vec<CircleEvent>,
    pub challenges: Vec<ChallengeWithParticipants>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct JoinCircle {
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct MessageStats {
    pub messages_today: i64,
    pub daily_limit: i64,
    pub remaining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: Uuid,
    pub name: String,
    pub level: i64,
    pub community_points: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct LeaderboardOptOut {
    /// Explicit value; toggles the current setting when absent.
    pub opt_out: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateChallengeProgress {
    pub progress: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProgressOutcome {
    pub participant: ChallengeParticipant,
    pub newly_completed: bool,
    pub points_awarded: i64,
}

/// Members eligible for the leaderboard, ranked by points then join time.
pub fn rank_members(mut members: Vec<CircleMemberProfile>) -> Vec<LeaderboardEntry> {
    members.retain(|m| !m.opt_out_of_leaderboard && m.show_on_leaderboard);
    members.sort_by(|a, b| {
        b.community_points
            .cmp(&a.community_points)
            .then(a.joined_at.cmp(&b.joined_at))
    });
    members
        .into_iter()
        .enumerate()
        .map(|(i, m)| LeaderboardEntry {
            rank: i as i64 + 1,
            user_id: m.user_id,
            name: m.name,
            level: m.level,
            community_points: m.community_points,
        })
        .collect()
}

pub struct CommunityService;

impl CommunityService {
    async fn circle(pool: &SqlitePool, circle_id: Uuid) -> Result<CommunityCircle, CommunityError> {
        CommunityCircle::find_by_id(pool, circle_id)
            .await?
            .ok_or(CommunityError::CircleNotFound)
    }

    async fn membership(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
    ) -> Result<CircleMember, CommunityError> {
        Self::circle(pool, circle_id).await?;
        CircleMember::find(pool, circle_id, user_id)
            .await?
            .ok_or(CommunityError::NotMember)
    }

    async fn admin(
        pool: &SqlitePool,
        circle_id: Uuid,
        user_id: Uuid,
    ) -> Result<CircleMember, CommunityError> {
        let member = Self::membership(pool, circle_id, user_id).await?;
        if member.role != MemberRole::Admin {
            return Err(CommunityError::NotAdmin);
        }
        Ok(member)
    }

    /// Creates a circle with the creator as its admin.
    pub async fn create_circle(
        pool: &SqlitePool,
        user_id: Uuid,
        data: CreateCircle,
        now: DateTime<Utc>,
    ) -> Result<CommunityCircle, CommunityError> {
        let data = data.validated()?;
        let code = data
            .is_private
            .unwrap_or(false)
            .then(|| invite_code(INVITE_CODE_LEN));

        let mut tx = pool.begin().await?;
        let circle = CommunityCircle::create(&mut *tx, user_id, &data, code.as_deref(), now).await?;
        CircleMember::add(&mut *tx, circle.id, user_id, MemberRole::Admin, now).await?;
        tx.commit().await?;

        info!(
            circle_id = %circle.id,
            user_id = %user_id,
            private = circle.is_private,
            "Circle created"
        );
        Ok(circle)
    }

    pub async fn list(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<CircleListing>, CommunityError> {
        let circles = CommunityCircle::list_visible(pool, user_id).await?;
        Ok(circles
            .into_iter()
            .map(|mut summary| {
                if !summary.is_member {
                    summary.circle.invite_code = None;
                }
                CircleListing {
                    available_spots: summary.available_spots(),
                    summary,
                }
            })
            .collect())
    }

    pub async fn details(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
    ) -> Result<CircleDetails, CommunityError> {
        let mut circle = Self::circle(pool, circle_id).await?;
        let member = CircleMember::find(pool, circle_id, user_id).await?;
        if circle.is_private && member.is_none() {
            return Err(CommunityError::NotMember);
        }
        if member.is_none() {
            circle.invite_code = None;
        }

        Ok(CircleDetails {
            members: CircleMember::profiles(pool, circle_id).await?,
            messages: CircleMessage::recent_visible(pool, circle_id, RECENT_MESSAGE_LIMIT).await?,
            events: CircleEvent::find_by_circle(pool, circle_id).await?,
            challenges: CircleChallenge::find_by_circle_with_participants(pool, circle_id).await?,
            is_member: member.is_some(),
            role: member.map(|m| m.role),
            circle,
        })
    }

    pub async fn join(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        payload: JoinCircle,
        now: DateTime<Utc>,
    ) -> Result<CircleMember, CommunityError> {
        let mut tx = pool.begin().await?;
        let circle = CommunityCircle::find_by_id(&mut *tx, circle_id)
            .await?
            .ok_or(CommunityError::CircleNotFound)?;
        if CircleMember::find(&mut *tx, circle_id, user_id).await?.is_some() {
            return Err(CommunityError::AlreadyMember);
        }
        if circle.is_private {
            let supplied = payload.invite_code.as_deref().map(str::trim);
            if supplied.is_none() || supplied != circle.invite_code.as_deref() {
                return Err(CommunityError::InvalidInviteCode);
            }
        }
        if CircleMember::count(&mut *tx, circle_id).await? >= circle.max_members {
            return Err(CommunityError::CircleFull);
        }

        let member = CircleMember::add(&mut *tx, circle_id, user_id, MemberRole::Member, now)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CommunityError::AlreadyMember
                } else {
                    CommunityError::Database(e)
                }
            })?;
        tx.commit().await?;

        info!(circle_id = %circle_id, user_id = %user_id, "Joined circle");
        Ok(member)
    }

    pub async fn leave(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
    ) -> Result<(), CommunityError> {
        Self::circle(pool, circle_id).await?;
        if CircleMember::remove(pool, circle_id, user_id).await? == 0 {
            return Err(CommunityError::MembershipNotFound);
        }
        info!(circle_id = %circle_id, user_id = %user_id, "Left circle");
        Ok(())
    }

    pub async fn post_message(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        payload: PostMessage,
        now: DateTime<Utc>,
    ) -> Result<CircleMessage, CommunityError> {
        let payload = payload.validated()?;
        let circle = Self::circle(pool, circle_id).await?;
        Self::membership(pool, circle_id, user_id).await?;

        let sent_today =
            CircleMessage::count_since(pool, circle_id, user_id, start_of_day(day_of(now))).await?;
        if sent_today >= circle.max_messages_per_day {
            return Err(CommunityError::MessageLimitReached(circle.max_messages_per_day));
        }
        Ok(CircleMessage::create(pool, circle_id, user_id, &payload.content, now).await?)
    }

    pub async fn message_stats(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<MessageStats, CommunityError> {
        let circle = Self::circle(pool, circle_id).await?;
        Self::membership(pool, circle_id, user_id).await?;
        let messages_today =
            CircleMessage::count_since(pool, circle_id, user_id, start_of_day(day_of(now))).await?;
        Ok(MessageStats {
            messages_today,
            daily_limit: circle.max_messages_per_day,
            remaining: (circle.max_messages_per_day - messages_today).max(0),
        })
    }

    pub async fn leaderboard(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
    ) -> Result<Vec<LeaderboardEntry>, CommunityError> {
        let circle = Self::circle(pool, circle_id).await?;
        if circle.is_private && CircleMember::find(pool, circle_id, user_id).await?.is_none() {
            return Err(CommunityError::NotMember);
        }
        Ok(rank_members(CircleMember::profiles(pool, circle_id).await?))
    }

    /// Sets or toggles the caller's leaderboard opt-out and returns the new value.
    pub async fn set_leaderboard_opt_out(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        payload: LeaderboardOptOut,
    ) -> Result<bool, CommunityError> {
        let member = Self::membership(pool, circle_id, user_id).await?;
        let opt_out = payload.opt_out.unwrap_or(!member.opt_out_of_leaderboard);
        CircleMember::set_leaderboard_opt_out(pool, circle_id, user_id, opt_out).await?;
        Ok(opt_out)
    }

    pub async fn create_event(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        data: CreateCircleEvent,
        now: DateTime<Utc>,
    ) -> Result<CircleEvent, CommunityError> {
        let data = data.validated()?;
        Self::admin(pool, circle_id, user_id).await?;
        Ok(CircleEvent::create(pool, circle_id, user_id, &data, now).await?)
    }

    pub async fn create_challenge(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        data: CreateChallenge,
        now: DateTime<Utc>,
    ) -> Result<CircleChallenge, CommunityError> {
        let data = data.validated()?;
        Self::admin(pool, circle_id, user_id).await?;
        let challenge = CircleChallenge::create(pool, circle_id, user_id, &data, now).await?;
        info!(circle_id = %circle_id, challenge_id = %challenge.id, "Challenge created");
        Ok(challenge)
    }

    pub async fn join_challenge(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ChallengeParticipant, CommunityError> {
        Self::membership(pool, circle_id, user_id).await?;
        CircleChallenge::find_in_circle(pool, circle_id, challenge_id)
            .await?
            .ok_or(CommunityError::ChallengeNotFound)?;
        if ChallengeParticipant::find(pool, challenge_id, user_id).await?.is_some() {
            return Err(CommunityError::AlreadyJoined);
        }
        ChallengeParticipant::join(pool, challenge_id, user_id, now)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CommunityError::AlreadyJoined
                } else {
                    CommunityError::Database(e)
                }
            })
    }


    /// Records progress; the first time it reaches the target the reward is paid out.
    pub async fn update_challenge_progress(
        pool: &SqlitePool,
        user_id: Uuid,
        circle_id: Uuid,
        challenge_id: Uuid,
        payload: UpdateChallengeProgress,
        now: DateTime<Utc>,
    ) -> Result<ProgressOutcome, CommunityError> {
        if payload.progress < 0 {
            return Err(ValidationError::new("progress", "must not be negative").into());
        }

        let mut tx = pool.begin().await?;
        CommunityCircle::find_by_id(&mut *tx, circle_id)
            .await?
            .ok_or(CommunityError::CircleNotFound)?;
        // Participants who left the circle keep their row but can no longer progress.
        CircleMember::find(&mut *tx, circle_id, user_id)
            .await?
            .ok_or(CommunityError::NotMember)?;
        let challenge = CircleChallenge::find_in_circle(&mut *tx, circle_id, challenge_id)
            .await?
            .ok_or(CommunityError::ChallengeNotFound)?;
        let participant = ChallengeParticipant::find(&mut *tx, challenge_id, user_id)
            .await?
            .ok_or(CommunityError::NotParticipant)?;

        let newly_completed = !participant.completed && payload.progress >= challenge.target;
        let participant = ChallengeParticipant::update_progress(
            &mut *tx,
            challenge_id,
            user_id,
            payload.progress,
            newly_completed.then_some(now),
        )
        .await?;

        let points_awarded = if newly_completed {
            let updated =
                CircleMember::add_points(&mut *tx, circle_id, user_id, challenge.points_reward)
                    .await?;
            if updated != 1 {
                return Err(CommunityError::NotMember);
            }
            challenge.points_reward
        } else {
            0
        };
        tx.commit().await?;

        if newly_completed {
            info!(
                challenge_id = %challenge_id,
                user_id = %user_id,
                points = points_awarded,
                "Challenge completed"
            );
        }
        Ok(ProgressOutcome {
            participant,
            newly_completed,
            points_awarded,
        })
    }
}
