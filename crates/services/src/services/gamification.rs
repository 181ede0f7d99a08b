//! Gamification engine: XP awards, streaks, consistency and level transitions.
//!
//! Every operation that touches more than one record runs inside a single
//! SQLite transaction; a failure at any step leaves no partial writes.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use db::models::{
    ValidationError,
    completion::{CompleteHabit, Completion, NewCompletion},
    habit::{Habit, HabitStats},
    user::{MAX_FORGIVENESS_TOKENS, User},
    xp_transaction::{NewXpTransaction, XpSource, XpTransaction},
};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;
use utils::date::{day_of, window_start};
use uuid::Uuid;

pub const BASE_COMPLETION_XP: i64 = 10;
pub const FORGIVENESS_XP: i64 = 5;
pub const XP_PER_LEVEL_UNIT: i64 = 100;
pub const CONSISTENCY_WINDOW_DAYS: i64 = 30;
pub const FIRST_COMPLETION_MULTIPLIER: f64 = 1.5;
pub const MAX_MANUAL_XP: i64 = 1000;

const LEVEL_MILESTONES: [i64; 6] = [5, 10, 25, 50, 75, 100];

#[derive(Debug, Error)]
pub enum GamificationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Habit not found")]
    HabitNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Archived habits cannot be completed")]
    HabitArchived,
    #[error("Habit already completed for this date")]
    AlreadyCompleted,
    #[error("Completion date cannot be in the future")]
    FutureDate,
    #[error("No forgiveness tokens available")]
    NoForgivenessTokens,
    #[error("XP amount must be between 1 and {MAX_MANUAL_XP}")]
    InvalidXpAmount,
    #[error("XP source '{0}' cannot be granted manually")]
    InvalidXpSource(XpSource),
}

/// Maps a unique-index violation on a completion insert to `AlreadyCompleted`.
fn completion_conflict(err: sqlx::Error) -> GamificationError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => GamificationError::AlreadyCompleted,
        _ => GamificationError::Database(err),
    }
}

// ---------------------------------------------------------------------------
// Level math
// ---------------------------------------------------------------------------

/// `floor(sqrt(total_xp / 100)) + 1`, computed without float drift.
pub fn level_for_xp(total_xp: i64) -> i64 {
    let xp = total_xp.max(0);
    let mut steps = ((xp as f64) / XP_PER_LEVEL_UNIT as f64).sqrt() as i64;
    while XP_PER_LEVEL_UNIT * (steps + 1) * (steps + 1) <= xp {
        steps += 1;
    }
    while steps > 0 && XP_PER_LEVEL_UNIT * steps * steps > xp {
        steps -= 1;
    }
    steps + 1
}

/// Total XP at which `level` is reached.
pub fn xp_for_level(level: i64) -> i64 {
    let steps = (level - 1).max(0);
    XP_PER_LEVEL_UNIT * steps * steps
}

pub fn level_title(level: i64) -> &'static str {
    match level {
        l if l >= 100 => "Grandmaster",
        l if l >= 75 => "Master",
        l if l >= 50 => "Expert",
        l if l >= 25 => "Advanced",
        l if l >= 10 => "Intermediate",
        l if l >= 5 => "Novice",
        _ => "Beginner",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct Milestone {
    pub level: i64,
    pub title: String,
}

pub fn next_milestone(level: i64) -> Milestone {
    let next = LEVEL_MILESTONES
        .iter()
        .copied()
        .find(|m| *m > level)
        .unwrap_or(level + 25);
    Milestone {
        level: next,
        title: level_title(next).to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct LevelInfo {
    pub current_level: i64,
    pub current_xp: i64,
    pub xp_for_current_level: i64,
    pub xp_for_next_level: i64,
    pub xp_progress: i64,
    pub progress_percentage: f64,
    pub title: String,
    pub next_milestone: Milestone,
}

pub fn level_info(total_xp: i64) -> LevelInfo {
    let current_level = level_for_xp(total_xp);
    let xp_for_current_level = xp_for_level(current_level);
    let xp_for_next_level = xp_for_level(current_level + 1);
    let xp_progress = total_xp - xp_for_current_level;
    let needed = (xp_for_next_level - xp_for_current_level).max(1);
    LevelInfo {
        current_level,
        current_xp: total_xp,
        xp_for_current_level,
        xp_for_next_level,
        xp_progress,
        progress_percentage: xp_progress as f64 / needed as f64 * 100.0,
        title: level_title(current_level).to_string(),
        next_milestone: next_milestone(current_level),
    }
}

// ---------------------------------------------------------------------------
// XP awards
// ---------------------------------------------------------------------------

/// Cumulative bonus: +5 from 7 days, +10 more from 30, +20 more from 100.
pub fn streak_bonus(current_streak: i64) -> i64 {
    let mut bonus = 0;
    if current_streak >= 7 {
        bonus += 5;
    }
    if current_streak >= 30 {
        bonus += 10;
    }
    if current_streak >= 100 {
        bonus += 20;
    }
    bonus
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq)]
pub struct XpAward {
    pub base_xp: i64,
    pub streak_bonus: i64,
    pub multiplier: f64,
    pub total: i64,
}

/// XP for one completion given the streak it produces.
pub fn completion_xp(
    current_streak: i64,
    first_completion: bool,
    difficulty: Option<i64>,
) -> XpAward {
    let bonus = streak_bonus(current_streak);
    let mut multiplier = 1.0;
    if first_completion {
        multiplier = FIRST_COMPLETION_MULTIPLIER;
    }
    if let Some(difficulty) = difficulty {
        multiplier *= difficulty as f64 / 3.0;
    }
    XpAward {
        base_xp: BASE_COMPLETION_XP,
        streak_bonus: bonus,
        multiplier,
        total: ((BASE_COMPLETION_XP + bonus) as f64 * multiplier).round() as i64,
    }
}

// ---------------------------------------------------------------------------
// Streaks and consistency
// ---------------------------------------------------------------------------

/// Derives habit statistics from its distinct completion days (ascending) as of `today`.
pub fn stats_from_days(days: &[NaiveDate], today: NaiveDate) -> HabitStats {
    let Some(&last) = days.last() else {
        return HabitStats::default();
    };

    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for &day in days {
        run = match previous {
            Some(prev) if day - prev == Duration::days(1) => run + 1,
            Some(prev) if day == prev => run,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }

    // `run` now holds the length of the run ending at `last`.
    let yesterday = today - Duration::days(1);
    let current = if last >= yesterday { run } else { 0 };

    let window_from = window_start(today, CONSISTENCY_WINDOW_DAYS);
    let in_window = days
        .iter()
        .filter(|d| **d >= window_from && **d <= today)
        .count() as f64;
    let consistency =
        ((in_window / CONSISTENCY_WINDOW_DAYS as f64) * 100.0).round() as i64;

    HabitStats {
        total_completions: days.len() as i64,
        current_streak: current,
        longest_streak: longest.max(current),
        consistency_rate: consistency.clamp(0, 100),
        last_completed_on: Some(last),
    }
}

// ---------------------------------------------------------------------------
// Level-up application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq)]
pub struct XpOutcome {
    pub old_level: i64,
    pub new_level: i64,
    pub leveled_up: bool,
    pub level_up_bonus: i64,
    pub total_xp: i64,
    pub forgiveness_tokens: i64,
    pub tokens_granted: i64,
}

/// Adds `amount` XP to a user's totals and applies the level-up rules.
///
/// A level-up awards `new_level * 10` bonus XP once; reaching a multiple of ten
/// grants a forgiveness token, capped at the maximum.
pub fn apply_xp(total_xp: i64, forgiveness_tokens: i64, amount: i64) -> XpOutcome {
    let old_level = level_for_xp(total_xp);
    let mut total = total_xp + amount;
    let reached = level_for_xp(total);
    let mut level_up_bonus = 0;
    if reached > old_level {
        level_up_bonus = reached * 10;
        total += level_up_bonus;
    }
    let new_level = level_for_xp(total);

    let crossed_tens = (old_level + 1..=new_level).any(|l| l % 10 == 0);
    let tokens = if crossed_tens {
        (forgiveness_tokens + 1).min(MAX_FORGIVENESS_TOKENS)
    } else {
        forgiveness_tokens
    };

    XpOutcome {
        old_level,
        new_level,
        leveled_up: new_level > old_level,
        level_up_bonus,
        total_xp: total,
        forgiveness_tokens: tokens,
        tokens_granted: tokens - forgiveness_tokens,
    }
}

/// Writes an XP gain (plus any level bonus) to the ledger and the user row.
async fn grant_xp(
    conn: &mut SqliteConnection,
    user: &User,
    entry: NewXpTransaction,
    now: DateTime<Utc>,
) -> Result<XpOutcome, GamificationError> {
    let outcome = apply_xp(user.total_xp, user.forgiveness_tokens, entry.amount);
    XpTransaction::create(&mut *conn, &entry, now).await?;

    if outcome.level_up_bonus > 0 {
        XpTransaction::create(
            &mut *conn,
            &NewXpTransaction {
                user_id: user.id,
                habit_id: None,
                amount: outcome.level_up_bonus,
                source: XpSource::LevelBonus,
                description: format!("Level {} bonus", outcome.new_level),
                metadata: Some(serde_json::json!({
                    "new_level": outcome.new_level,
                    "old_level": outcome.old_level,
                })),
            },
            now,
        )
        .await?;
    }

    User::update_progress(
        &mut *conn,
        user.id,
        outcome.new_level,
        outcome.total_xp,
        outcome.forgiveness_tokens,
        now,
    )
    .await?;

    if outcome.leveled_up {
        info!(
            user_id = %user.id,
            old_level = outcome.old_level,
            new_level = outcome.new_level,
            bonus = outcome.level_up_bonus,
            "User leveled up"
        );
    }
    Ok(outcome)
}

/// Recomputes and stores a habit's statistics from its completion history.
async fn refresh_stats(
    conn: &mut SqliteConnection,
    habit_id: Uuid,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Habit, sqlx::Error> {
    let days = Completion::days_for_habit(&mut *conn, habit_id).await?;
    let stats = stats_from_days(&days, today);
    Habit::update_stats(&mut *conn, habit_id, &stats, now).await
}

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CompletionOutcome {
    pub completion: Completion,
    pub xp_earned: i64,
    pub level_up_bonus: i64,
    pub new_level: i64,
    pub leveled_up: bool,
    pub new_total_xp: i64,
    pub current_streak: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ForgiveHabit {
    pub date: DateTime<Utc>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ForgivenessOutcome {
    pub completion: Completion,
    pub remaining_tokens: i64,
    pub current_streak: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AddXp {
    pub amount: i64,
    pub source: XpSource,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GamificationData {
    pub level_info: LevelInfo,
    pub total_xp: i64,
    pub forgiveness_tokens: i64,
    pub max_forgiveness_tokens: i64,
    pub transaction_count: i64,
    pub xp_last_7_days: i64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct GamificationService;

impl GamificationService {
    /// Marks a habit complete and applies every derived update atomically.
    pub async fn complete_habit(
        pool: &SqlitePool,
        user_id: Uuid,
        habit_id: Uuid,
        payload: CompleteHabit,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome, GamificationError> {
        let payload = payload.validated()?;
        let today = day_of(now);
        let completed_at = payload.date.unwrap_or(now);
        let day = day_of(completed_at);
        if day > today {
            return Err(GamificationError::FutureDate);
        }

        let mut tx = pool.begin().await?;

        let habit = Habit::find_for_user(&mut *tx, habit_id, user_id)
            .await?
            .ok_or(GamificationError::HabitNotFound)?;
        if habit.archived {
            return Err(GamificationError::HabitArchived);
        }
        if Completion::exists_on_day(&mut *tx, habit_id, day).await? {
            return Err(GamificationError::AlreadyCompleted);
        }
        let user = User::find_by_id(&mut *tx, user_id)
            .await?
            .ok_or(GamificationError::UserNotFound)?;

        let mut completion = Completion::create(
            &mut *tx,
            &NewCompletion {
                habit_id,
                user_id,
                completed_at,
                device_timezone: payload
                    .timezone
                    .clone()
                    .unwrap_or_else(|| user.timezone.clone()),
                xp_earned: 0,
                notes: payload.notes.clone(),
                mood: payload.mood,
                difficulty: payload.difficulty,
                duration_minutes: payload.duration,
                forgiveness_used: false,
                edited_flag: false,
            },
            now,
        )
        .await
        .map_err(completion_conflict)?;

        let habit = refresh_stats(&mut tx, habit_id, today, now).await?;
        let award = completion_xp(
            habit.current_streak,
            habit.total_completions == 1,
            payload.difficulty,
        );
        Completion::set_xp(&mut *tx, completion.id, award.total).await?;
        completion.xp_earned = award.total;

        let outcome = grant_xp(
            &mut tx,
            &user,
            NewXpTransaction {
                user_id,
                habit_id: Some(habit_id),
                amount: award.total,
                source: XpSource::HabitCompletion,
                description: format!("Completed {}", habit.name),
                metadata: Some(serde_json::json!({
                    "streak_length": habit.current_streak,
                    "multiplier": award.multiplier,
                    "base_xp": award.base_xp,
                    "streak_bonus": award.streak_bonus,
                })),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %user_id,
            habit_id = %habit_id,
            xp = award.total,
            streak = habit.current_streak,
            "Habit completed"
        );

        Ok(CompletionOutcome {
            completion,
            xp_earned: award.total,
            level_up_bonus: outcome.level_up_bonus,
            new_level: outcome.new_level,
            leveled_up: outcome.leveled_up,
            new_total_xp: outcome.total_xp,
            current_streak: habit.current_streak,
        })
    }

    /// Spends a forgiveness token to fill a missed day.
    pub async fn use_forgiveness(
        pool: &SqlitePool,
        user_id: Uuid,
        habit_id: Uuid,
        payload: ForgiveHabit,
        now: DateTime<Utc>,
    ) -> Result<ForgivenessOutcome, GamificationError> {
        let today = day_of(now);
        let day = day_of(payload.date);
        if day > today {
            return Err(GamificationError::FutureDate);
        }

        let mut tx = pool.begin().await?;

        let user = User::find_by_id(&mut *tx, user_id)
            .await?
            .ok_or(GamificationError::UserNotFound)?;
        if user.forgiveness_tokens <= 0 {
            return Err(GamificationError::NoForgivenessTokens);
        }
        Habit::find_for_user(&mut *tx, habit_id, user_id)
            .await?
            .ok_or(GamificationError::HabitNotFound)?;
        if Completion::exists_on_day(&mut *tx, habit_id, day).await? {
            return Err(GamificationError::AlreadyCompleted);
        }

        let completion = Completion::create(
            &mut *tx,
            &NewCompletion {
                habit_id,
                user_id,
                completed_at: payload.date,
                device_timezone: payload.timezone.unwrap_or_else(|| user.timezone.clone()),
                xp_earned: FORGIVENESS_XP,
                notes: None,
                mood: None,
                difficulty: None,
                duration_minutes: None,
                forgiveness_used: true,
                edited_flag: true,
            },
            now,
        )
        .await
        .map_err(completion_conflict)?;

        let habit = refresh_stats(&mut tx, habit_id, today, now).await?;

        // Spend the token before granting XP so a level-up token lands on top of it.
        let spent = User {
            forgiveness_tokens: user.forgiveness_tokens - 1,
            ..user
        };
        let outcome = grant_xp(
            &mut tx,
            &spent,
            NewXpTransaction {
                user_id,
                habit_id: Some(habit_id),
                amount: FORGIVENESS_XP,
                source: XpSource::Forgiveness,
                description: format!("Forgiveness used for {}", habit.name),
                metadata: Some(serde_json::json!({ "date": day })),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            user_id = %user_id,
            habit_id = %habit_id,
            day = %day,
            remaining_tokens = outcome.forgiveness_tokens,
            "Forgiveness token used"
        );

        Ok(ForgivenessOutcome {
            completion,
            remaining_tokens: outcome.forgiveness_tokens,
            current_streak: habit.current_streak,
        })
    }

    /// Grants XP outside habit completion (bonuses, challenge rewards).
    pub async fn add_xp(
        pool: &SqlitePool,
        user_id: Uuid,
        payload: AddXp,
        now: DateTime<Utc>,
    ) -> Result<XpOutcome, GamificationError> {
        if !(1..=MAX_MANUAL_XP).contains(&payload.amount) {
            return Err(GamificationError::InvalidXpAmount);
        }
        if !matches!(payload.source, XpSource::Bonus | XpSource::Challenge) {
            return Err(GamificationError::InvalidXpSource(payload.source));
        }

        let mut tx = pool.begin().await?;
        let user = User::find_by_id(&mut *tx, user_id)
            .await?
            .ok_or(GamificationError::UserNotFound)?;
        let description = payload
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("{} XP", payload.source));
        let outcome = grant_xp(
            &mut tx,
            &user,
            NewXpTransaction {
                user_id,
                habit_id: None,
                amount: payload.amount,
                source: payload.source,
                description,
                metadata: None,
            },
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Recomputes statistics for every habit of a user. Returns the number updated.
    pub async fn recalculate_user_habits(
        pool: &SqlitePool,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, GamificationError> {
        let today = day_of(now);
        let habits = Habit::find_by_user(pool, user_id, &Default::default()).await?;
        let mut tx = pool.begin().await?;
        for habit in &habits {
            refresh_stats(&mut tx, habit.id, today, now).await?;
        }
        tx.commit().await?;
        debug!(user_id = %user_id, count = habits.len(), "Recalculated habit statistics");
        Ok(habits.len())
    }

    /// Resets streaks of habits whose last completion is before yesterday.
    pub async fn reset_lapsed_streaks(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<usize, GamificationError> {
        let today = day_of(now);
        let cutoff = today - Duration::days(1);
        let lapsed = Habit::find_with_lapsed_streaks(pool, cutoff).await?;
        for habit in &lapsed {
            let mut conn = pool.acquire().await?;
            refresh_stats(&mut conn, habit.id, today, now).await?;
        }
        Ok(lapsed.len())
    }

    pub async fn data(
        pool: &SqlitePool,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<GamificationData, GamificationError> {
        let transaction_count = XpTransaction::count_for_user(pool, user.id).await?;
        let xp_last_7_days =
            XpTransaction::sum_since(pool, user.id, now - Duration::days(7)).await?;
        Ok(GamificationData {
            level_info: level_info(user.total_xp),
            total_xp: user.total_xp,
            forgiveness_tokens: user.forgiveness_tokens,
            max_forgiveness_tokens: MAX_FORGIVENESS_TOKENS,
            transaction_count,
            xp_last_7_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use db::{
        DBService,
        models::{habit::CreateHabit, user::CreateUser},
    };

    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    async fn setup() -> (DBService, User, Habit) {
        let db = DBService::new_in_memory().await.unwrap();
        let now = noon(2024, 3, 1);
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                timezone: None,
            }
            .validated()
            .unwrap(),
            now,
        )
        .await
        .unwrap();
        let habit = Habit::create(
            &db.pool,
            user.id,
            &CreateHabit {
                name: "Meditate".into(),
                description: None,
                category: None,
                frequency: None,
                reminder_time: None,
                reminder_enabled: None,
                color: None,
                icon: None,
            },
            now,
        )
        .await
        .unwrap();
        (db, user, habit)
    }

    #[test]
    fn level_curve_matches_square_root_formula() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(8100), 10);
        assert_eq!(xp_for_level(10), 8100);
    }

    #[test]
    fn level_info_reports_progress_and_titles() {
        let info = level_info(250);
        assert_eq!(info.current_level, 2);
        assert_eq!(info.xp_for_current_level, 100);
        assert_eq!(info.xp_for_next_level, 400);
        assert_eq!(info.xp_progress, 150);
        assert!((info.progress_percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(info.title, "Beginner");
        assert_eq!(info.next_milestone.level, 5);
        assert_eq!(next_milestone(100).level, 125);
        assert_eq!(level_title(75), "Master");
    }

    #[test]
    fn streak_bonus_is_cumulative() {
        assert_eq!(streak_bonus(6), 0);
        assert_eq!(streak_bonus(7), 5);
        assert_eq!(streak_bonus(30), 15);
        assert_eq!(streak_bonus(100), 35);
    }

    #[test]
    fn completion_xp_applies_multipliers() {
        assert_eq!(completion_xp(1, false, None).total, 10);
        assert_eq!(completion_xp(1, true, None).total, 15);
        // (10 + 5) * 5 / 3 = 25
        assert_eq!(completion_xp(7, false, Some(5)).total, 25);
        // 10 * 1/3 = 3.33
        assert_eq!(completion_xp(2, false, Some(1)).total, 3);
    }

    #[test]
    fn stats_count_current_and_longest_runs() {
        let today = day(2024, 3, 10);
        let days = [
            day(2024, 3, 1),
            day(2024, 3, 2),
            day(2024, 3, 3),
            day(2024, 3, 8),
            day(2024, 3, 9),
        ];
        let stats = stats_from_days(&days, today);
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 3);
        assert_eq!(stats.total_completions, 5);
        assert_eq!(stats.consistency_rate, 17);
        assert_eq!(stats.last_completed_on, Some(day(2024, 3, 9)));
    }

    #[test]
    fn streak_breaks_after_a_full_missed_day() {
        let days = [day(2024, 3, 7), day(2024, 3, 8)];
        assert_eq!(stats_from_days(&days, day(2024, 3, 10)).current_streak, 0);
        assert_eq!(stats_from_days(&days, day(2024, 3, 10)).longest_streak, 2);
        assert_eq!(stats_from_days(&[], day(2024, 3, 10)), HabitStats::default());
    }

    #[test]
    fn consistency_is_capped_at_100() {
        let today = day(2024, 3, 30);
        let days: Vec<_> = (0..40).map(|i| today - Duration::days(39 - i)).collect();
        assert_eq!(stats_from_days(&days, today).consistency_rate, 100);
    }

    #[test]
    fn apply_xp_awards_single_level_bonus() {
        let outcome = apply_xp(95, 2, 10);
        assert!(outcome.leveled_up);
        assert_eq!(outcome.old_level, 1);
        assert_eq!(outcome.level_up_bonus, 20);
        assert_eq!(outcome.total_xp, 125);
        assert_eq!(outcome.new_level, 2);
        assert_eq!(outcome.tokens_granted, 0);
    }

    #[test]
    fn reaching_level_ten_grants_a_token_up_to_the_cap() {
        let outcome = apply_xp(8000, 0, 100);
        assert_eq!(outcome.new_level, 10);
        assert_eq!(outcome.forgiveness_tokens, 1);

        let capped = apply_xp(8000, MAX_FORGIVENESS_TOKENS, 100);
        assert_eq!(capped.forgiveness_tokens, MAX_FORGIVENESS_TOKENS);
        assert_eq!(capped.tokens_granted, 0);
    }

    #[tokio::test]
    async fn completing_a_habit_updates_every_record() {
        let (db, user, habit) = setup().await;
        let now = noon(2024, 3, 1);

        let outcome = GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            now,
        )
        .await
        .unwrap();

        assert_eq!(outcome.xp_earned, 15);
        assert_eq!(outcome.current_streak, 1);
        assert_eq!(outcome.completion.xp_earned, 15);
        assert!(!outcome.leveled_up);

        let habit = Habit::find_for_user(&db.pool, habit.id, user.id).await.unwrap().unwrap();
        assert_eq!(habit.total_completions, 1);
        assert_eq!(habit.current_streak, 1);
        assert_eq!(habit.consistency_rate, 3);

        let user = User::find_by_id(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.total_xp, 15);
        assert_eq!(user.level, 1);

        let ledger = XpTransaction::find_by_user(&db.pool, user.id, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].source, XpSource::HabitCompletion);
        assert_eq!(ledger[0].description, "Completed Meditate");
        let metadata = ledger[0].parsed_metadata().unwrap();
        assert_eq!(metadata["streak_length"], 1);
    }

    #[tokio::test]
    async fn second_completion_same_day_is_rejected_without_side_effects() {
        let (db, user, habit) = setup().await;
        let now = noon(2024, 3, 1);
        GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            now,
        )
        .await
        .unwrap();

        let err = GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            now + Duration::hours(3),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GamificationError::AlreadyCompleted));

        let user = User::find_by_id(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.total_xp, 15);
        assert_eq!(XpTransaction::count_for_user(&db.pool, user.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn streak_builds_over_consecutive_days_and_levels_up() {
        let (db, user, habit) = setup().await;
        let mut last = None;
        for d in 1..=10 {
            last = Some(
                GamificationService::complete_habit(
                    &db.pool,
                    user.id,
                    habit.id,
                    CompleteHabit::default(),
                    noon(2024, 3, d),
                )
                .await
                .unwrap(),
            );
        }
        let last = last.unwrap();
        assert_eq!(last.current_streak, 10);
        // 15 + 5 * 10 + 4 * 15 = 125 earned, crossing level 2 on day 9.
        assert_eq!(last.xp_earned, 15);

        let user = User::find_by_id(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(user.level, level_for_xp(user.total_xp));
        assert!(user.level >= 2);
        let ledger = XpTransaction::find_by_user(&db.pool, user.id, 50).await.unwrap();
        assert!(ledger.iter().any(|t| t.source == XpSource::LevelBonus));
    }

    #[tokio::test]
    async fn future_dates_and_foreign_habits_are_rejected() {
        let (db, user, habit) = setup().await;
        let now = noon(2024, 3, 1);

        let future = CompleteHabit {
            date: Some(now + Duration::days(2)),
            ..Default::default()
        };
        let err = GamificationService::complete_habit(&db.pool, user.id, habit.id, future, now)
            .await
            .unwrap_err();
        assert!(matches!(err, GamificationError::FutureDate));

        let err = GamificationService::complete_habit(
            &db.pool,
            Uuid::new_v4(),
            habit.id,
            CompleteHabit::default(),
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GamificationError::HabitNotFound));
    }

    #[tokio::test]
    async fn forgiveness_fills_a_gap_and_spends_a_token() {
        let (db, user, habit) = setup().await;
        GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            noon(2024, 3, 1),
        )
        .await
        .unwrap();
        let now = noon(2024, 3, 3);
        GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            now,
        )
        .await
        .unwrap();

        let outcome = GamificationService::use_forgiveness(
            &db.pool,
            user.id,
            habit.id,
            ForgiveHabit {
                date: noon(2024, 3, 2),
                timezone: None,
            },
            now,
        )
        .await
        .unwrap();

        assert!(outcome.completion.forgiveness_used);
        assert!(outcome.completion.edited_flag);
        assert_eq!(outcome.completion.xp_earned, FORGIVENESS_XP);
        assert_eq!(outcome.remaining_tokens, 1);
        assert_eq!(outcome.current_streak, 3);
    }

    #[tokio::test]
    async fn forgiveness_requires_tokens() {
        let (db, user, habit) = setup().await;
        let now = noon(2024, 3, 10);
        for d in [1, 2] {
            GamificationService::use_forgiveness(
                &db.pool,
                user.id,
                habit.id,
                ForgiveHabit {
                    date: noon(2024, 3, d),
                    timezone: None,
                },
                now,
            )
            .await
            .unwrap();
        }
        let err = GamificationService::use_forgiveness(
            &db.pool,
            user.id,
            habit.id,
            ForgiveHabit {
                date: noon(2024, 3, 3),
                timezone: None,
            },
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GamificationError::NoForgivenessTokens));
    }

    #[tokio::test]
    async fn forgiveness_keeps_the_token_earned_by_reaching_level_ten() {
        let (db, user, habit) = setup().await;
        let now = noon(2024, 3, 10);
        // One forgiveness grant short of level 10.
        User::update_progress(&db.pool, user.id, 9, 8_099, 1, now)
            .await
            .unwrap();

        let outcome = GamificationService::use_forgiveness(
            &db.pool,
            user.id,
            habit.id,
            ForgiveHabit {
                date: noon(2024, 3, 9),
                timezone: None,
            },
            now,
        )
        .await
        .unwrap();
        assert_eq!(outcome.remaining_tokens, 1);

        let stored = User::find_by_id(&db.pool, user.id).await.unwrap().unwrap();
        assert_eq!(stored.level, 10);
        assert_eq!(stored.forgiveness_tokens, 1);
        assert_eq!(stored.total_xp, 8_099 + FORGIVENESS_XP + 100);

        let ledger = XpTransaction::find_by_user(&db.pool, user.id, 10)
            .await
            .unwrap();
        assert!(
            ledger
                .iter()
                .any(|t| t.source == XpSource::LevelBonus && t.amount == 100)
        );
    }

    #[tokio::test]
    async fn manual_xp_is_bounded_and_source_checked() {
        let (db, user, _) = setup().await;
        let now = noon(2024, 3, 1);
        let err = GamificationService::add_xp(
            &db.pool,
            user.id,
            AddXp {
                amount: 10,
                source: XpSource::LevelBonus,
                description: None,
            },
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GamificationError::InvalidXpSource(_)));

        let outcome = GamificationService::add_xp(
            &db.pool,
            user.id,
            AddXp {
                amount: 400,
                source: XpSource::Bonus,
                description: Some("Welcome".into()),
            },
            now,
        )
        .await
        .unwrap();
        assert_eq!(outcome.new_level, 3);
        assert_eq!(outcome.level_up_bonus, 30);
    }

    #[tokio::test]
    async fn lapsed_streaks_are_reset() {
        let (db, user, habit) = setup().await;
        GamificationService::complete_habit(
            &db.pool,
            user.id,
            habit.id,
            CompleteHabit::default(),
            noon(2024, 3, 1),
        )
        .await
        .unwrap();

        assert_eq!(
            GamificationService::reset_lapsed_streaks(&db.pool, noon(2024, 3, 2)).await.unwrap(),
            0
        );
        assert_eq!(
            GamificationService::reset_lapsed_streaks(&db.pool, noon(2024, 3, 5)).await.unwrap(),
            1
        );
        let habit = Habit::find_for_user(&db.pool, habit.id, user.id).await.unwrap().unwrap();
        assert_eq!(habit.current_streak, 0);
        assert_eq!(habit.longest_streak, 1);
        assert_eq!(habit.total_completions, 1);
    }
}
