//! Read-only reporting over a user's habits and completions.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use db::models::{
    completion::{Completion, DailyTotal},
    habit::Habit,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;
use utils::date::{month_bounds, weekday_name, window_start};
use uuid::Uuid;

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const MAX_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid month '{0}', expected YYYY-MM")]
    InvalidMonth(String),
}

/// Clamps a requested window to 1..=365 days.
pub fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS)
}

fn percentage(part: i64, whole: i64) -> i64 {
    if whole <= 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct Overview {
    pub days: i64,
    pub total_habits: i64,
    pub total_completions: i64,
    pub today_completions: i64,
    pub consistency_rate: i64,
    pub active_days: i64,
    pub longest_streak: i64,
    pub total_current_streaks: i64,
    pub today_completion_rate: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub completions: i64,
    pub xp_earned: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct WeeklySummary {
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub total_completions: i64,
    pub total_habits: i64,
    pub average_completion_rate: i64,
    pub best_day: Option<String>,
    pub worst_day: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct HabitPerformance {
    pub habit_id: Uuid,
    pub name: String,
    pub completions: i64,
    pub completion_rate: i64,
    pub total_xp: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub consistency_rate: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct ConsistencyDay {
    pub date: NaiveDate,
    pub value: i64,
    pub level: u8,
}

/// Heat-map bucket for a day's completion count.
pub fn heat_level(count: i64) -> u8 {
    match count {
        c if c >= 5 => 4,
        c if c >= 3 => 3,
        2 => 2,
        1 => 1,
        _ => 0,
    }
}

/// One point per day from `from` to `to`, zero-filled.
pub fn fill_trend(totals: &[DailyTotal], from: NaiveDate, to: NaiveDate) -> Vec<TrendPoint> {
    let by_day: HashMap<NaiveDate, &DailyTotal> = totals.iter().map(|t| (t.day, t)).collect();
    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            let total = by_day.get(&date);
            TrendPoint {
                date,
                completions: total.map_or(0, |t| t.completions),
                xp_earned: total.map_or(0, |t| t.xp_earned),
            }
        })
        .collect()
}

pub struct AnalyticsService;

impl AnalyticsService {
    pub async fn overview(
        pool: &SqlitePool,
        user_id: Uuid,
        days: i64,
        today: NaiveDate,
    ) -> Result<Overview, AnalyticsError> {
        let habits = Habit::find_active_by_user(pool, user_id).await?;
        let from = window_start(today, days);
        let completions = Completion::find_for_user_between(pool, user_id, from, today).await?;

        let total_habits = habits.len() as i64;
        let total_completions = completions.len() as i64;
        let today_completions = completions
            .iter()
            .filter(|c| c.completed_on == today)
            .count() as i64;
        let today_habits: HashSet<Uuid> = completions
            .iter()
            .filter(|c| c.completed_on == today)
            .map(|c| c.habit_id)
            .collect();
        let active_days = completions
            .iter()
            .map(|c| c.completed_on)
            .collect::<HashSet<_>>()
            .len() as i64;

        Ok(Overview {
            days,
            total_habits,
            total_completions,
            today_completions,
            consistency_rate: percentage(total_completions, total_habits * days).min(100),
            active_days,
            longest_streak: habits.iter().map(|h| h.longest_streak).max().unwrap_or(0),
            total_current_streaks: habits.iter().map(|h| h.current_streak).sum(),
            today_completion_rate: percentage(today_habits.len() as i64, total_habits).min(100),
        })
    }

    pub async fn trends(
        pool: &SqlitePool,
        user_id: Uuid,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<TrendPoint>, AnalyticsError> {
        let from = window_start(today, days);
        let totals = Completion::daily_totals_for_user(pool, user_id, from, today).await?;
        Ok(fill_trend(&totals, from, today))
    }

    pub async fn weekly_summary(
        pool: &SqlitePool,
        user_id: Uuid,
        today: NaiveDate,
    ) -> Result<WeeklySummary, AnalyticsError> {
        let habits = Habit::find_active_by_user(pool, user_id).await?;
        let from = window_start(today, 7);
        let totals = Completion::daily_totals_for_user(pool, user_id, from, today).await?;

        // Keyed by weekday number so ties resolve Monday-first.
        let mut by_weekday: BTreeMap<u32, (i64, NaiveDate)> = BTreeMap::new();
        for total in &totals {
            let entry = by_weekday
                .entry(total.day.weekday().num_days_from_monday())
                .or_insert((0, total.day));
            entry.0 += total.completions;
        }
        let best_day = by_weekday
            .values()
            .rev()
            .max_by_key(|(count, _)| *count)
            .map(|(_, day)| weekday_name(*day).to_string());
        let worst_day = by_weekday
            .values()
            .min_by_key(|(count, _)| *count)
            .map(|(_, day)| weekday_name(*day).to_string());

        let total_completions: i64 = totals.iter().map(|t| t.completions).sum();
        let total_habits = habits.len() as i64;
        Ok(WeeklySummary {
            week_start: from,
            week_end: today,
            total_completions,
            total_habits,
            average_completion_rate: percentage(total_completions, total_habits * 7).min(100),
            best_day,
            worst_day,
        })
    }

    pub async fn habit_performance(
        pool: &SqlitePool,
        user_id: Uuid,
        days: i64,
        today: NaiveDate,
    ) -> Result<Vec<HabitPerformance>, AnalyticsError> {
        let habits = Habit::find_active_by_user(pool, user_id).await?;
        let from = window_start(today, days);
        let completions = Completion::find_for_user_between(pool, user_id, from, today).await?;

        let mut per_habit: HashMap<Uuid, (i64, i64)> = HashMap::new();
        for completion in &completions {
            let entry = per_habit.entry(completion.habit_id).or_default();
            entry.0 += 1;
            entry.1 += completion.xp_earned;
        }

        let mut performance: Vec<HabitPerformance> = habits
            .into_iter()
            .map(|habit| {
                let (count, xp) = per_habit.get(&habit.id).copied().unwrap_or_default();
                HabitPerformance {
                    habit_id: habit.id,
                    name: habit.name,
                    completions: count,
                    completion_rate: percentage(count, days).min(100),
                    total_xp: xp,
                    current_streak: habit.current_streak,
                    longest_streak: habit.longest_streak,
                    consistency_rate: habit.consistency_rate,
                }
            })
            .collect();
        performance.sort_by(|a, b| b.completion_rate.cmp(&a.completion_rate));
        Ok(performance)
    }

    pub async fn consistency(
        pool: &SqlitePool,
        user_id: Uuid,
        month: &str,
    ) -> Result<Vec<ConsistencyDay>, AnalyticsError> {
        let (first, last) =
            month_bounds(month).ok_or_else(|| AnalyticsError::InvalidMonth(month.to_string()))?;
        let totals = Completion::daily_totals_for_user(pool, user_id, first, last).await?;
        Ok(totals
            .into_iter()
            .map(|t| ConsistencyDay {
                date: t.day,
                value: t.completions,
                level: heat_level(t.completions),
            })
            .collect())
    }

    /// Completions in the trailing window ending `today`, used by the coach for prompts.
    pub async fn recent_completions(
        pool: &SqlitePool,
        user_id: Uuid,
        today: NaiveDate,
        days: i64,
    ) -> Result<Vec<Completion>, AnalyticsError> {
        let from = window_start(today, days);
        Ok(Completion::find_for_user_between(pool, user_id, from, today).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use db::{
        DBService,
        models::{completion::CompleteHabit, habit::CreateHabit, user::{CreateUser, User}},
    };

    use super::*;
    use crate::services::gamification::GamificationService;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn noon(d: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&d.and_hms_opt(12, 0, 0).unwrap())
    }

    async fn seed() -> (DBService, Uuid, Vec<Habit>) {
        let db = DBService::new_in_memory().await.unwrap();
        let now = noon(day(2024, 3, 1));
        let user = User::create(
            &db.pool,
            &CreateUser {
                name: "Grace".into(),
                email: "grace@example.com".into(),
                timezone: None,
            },
            now,
        )
        .await
        .unwrap();
        let mut habits = Vec::new();
        for name in ["Run", "Read"] {
            let habit = Habit::create(
                &db.pool,
                user.id,
                &CreateHabit {
                    name: name.into(),
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
            habits.push(habit);
        }
        (db, user.id, habits)
    }

    async fn complete(db: &DBService, user_id: Uuid, habit_id: Uuid, on: NaiveDate) {
        GamificationService::complete_habit(
            &db.pool,
            user_id,
            habit_id,
            CompleteHabit::default(),
            noon(on),
        )
        .await
        .unwrap();
    }

    #[test]
    fn heat_levels_bucket_counts() {
        assert_eq!(heat_level(0), 0);
        assert_eq!(heat_level(1), 1);
        assert_eq!(heat_level(2), 2);
        assert_eq!(heat_level(4), 3);
        assert_eq!(heat_level(9), 4);
    }

    #[test]
    fn trend_is_zero_filled() {
        let totals = vec![DailyTotal {
            day: day(2024, 3, 2),
            completions: 2,
            xp_earned: 25,
        }];
        let points = fill_trend(&totals, day(2024, 3, 1), day(2024, 3, 3));
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].completions, 0);
        assert_eq!(points[1].xp_earned, 25);
        assert_eq!(points[2].date, day(2024, 3, 3));
    }

    #[test]
    fn windows_are_clamped() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(1000)), 365);
    }

    #[tokio::test]
    async fn overview_and_performance_reflect_completions() {
        let (db, user_id, habits) = seed().await;
        let today = day(2024, 3, 10);
        for d in 8..=10 {
            complete(&db, user_id, habits[0].id, day(2024, 3, d)).await;
        }
        complete(&db, user_id, habits[1].id, day(2024, 3, 9)).await;

        let overview = AnalyticsService::overview(&db.pool, user_id, 10, today).await.unwrap();
        assert_eq!(overview.total_habits, 2);
        assert_eq!(overview.total_completions, 4);
        assert_eq!(overview.today_completions, 1);
        assert_eq!(overview.active_days, 3);
        assert_eq!(overview.consistency_rate, 20);
        assert_eq!(overview.today_completion_rate, 50);
        assert_eq!(overview.longest_streak, 3);

        let performance = AnalyticsService::habit_performance(&db.pool, user_id, 10, today)
            .await
            .unwrap();
        assert_eq!(performance[0].name, "Run");
        assert_eq!(performance[0].completion_rate, 30);
        assert_eq!(performance[1].completions, 1);
    }

    #[tokio::test]
    async fn weekly_summary_and_heat_map() {
        let (db, user_id, habits) = seed().await;
        // 2024-03-04 is a Monday.
        complete(&db, user_id, habits[0].id, day(2024, 3, 4)).await;
        complete(&db, user_id, habits[1].id, day(2024, 3, 4)).await;
        complete(&db, user_id, habits[0].id, day(2024, 3, 6)).await;

        let summary = AnalyticsService::weekly_summary(&db.pool, user_id, day(2024, 3, 7))
            .await
            .unwrap();
        assert_eq!(summary.total_completions, 3);
        assert_eq!(summary.best_day.as_deref(), Some("Monday"));
        assert_eq!(summary.worst_day.as_deref(), Some("Wednesday"));

        let heat = AnalyticsService::consistency(&db.pool, user_id, "2024-03").await.unwrap();
        assert_eq!(heat.len(), 2);
        assert_eq!(heat[0].level, 2);

        assert!(matches!(
            AnalyticsService::consistency(&db.pool, user_id, "March").await,
            Err(AnalyticsError::InvalidMonth(_))
        ));
    }

    #[tokio::test]
    async fn empty_history_has_no_best_day() {
        let (db, user_id, _) = seed().await;
        let summary = AnalyticsService::weekly_summary(&db.pool, user_id, day(2024, 3, 7))
            .await
            .unwrap();
        assert_eq!(summary.best_day, None);
        assert_eq!(summary.average_completion_rate, 0);
    }
}
