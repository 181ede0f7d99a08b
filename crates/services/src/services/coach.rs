//! AI coach: builds prompts from a user's habit history and caches the model's answers.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, Timelike, Utc};
use db::models::{
    completion::Completion,
    habit::Habit,
    user::User,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use ts_rs::TS;
use utils::date::{day_of, weekday_name};
use uuid::Uuid;

use super::{
    ai_provider::{AiProviderError, AnthropicClient, LanguageModel, ask_json},
    analytics::{AnalyticsError, AnalyticsService},
    config::Config,
};

pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const CACHE_CAPACITY: u64 = 10_000;
const HISTORY_DAYS: i64 = 30;
const PATTERN_HISTORY_LIMIT: i64 = 90;
const MIN_PATTERN_COMPLETIONS: usize = 5;
const MIN_MOOD_SAMPLES: usize = 5;

const SYSTEM_PROMPT: &str = "You are HabitForge's habit coach. You give specific, encouraging, \
evidence-based advice grounded in the user's own data. Always answer with a single JSON object \
and no other text.";

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
    #[error("AI provider error: {0}")]
    Provider(#[from] AiProviderError),
    #[error("AI features are not configured")]
    Unavailable,
    #[error("AI personalization is disabled for this user")]
    OptedOut,
    #[error("Habit not found")]
    HabitNotFound,
    #[error("Not enough data: {0}")]
    InsufficientData(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AiStatus {
    pub available: bool,
    pub model: String,
    pub cache_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AiResponse {
    pub data: Value,
    pub generated_at: DateTime<Utc>,
    pub cached: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct SuggestionRequest {
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub preferences: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct CoachingRequest {
    pub challenge: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Optimization {
    pub patterns: Option<Value>,
    pub insights: Option<Value>,
    pub recommendations: Vec<Value>,
    pub generated_at: DateTime<Utc>,
}

/// Per-habit figures sent to the model.
#[derive(Debug, Serialize)]
struct HabitSnapshot<'a> {
    id: Uuid,
    name: &'a str,
    category: String,
    current_streak: i64,
    longest_streak: i64,
    consistency_rate: i64,
    total_completions: i64,
}

impl<'a> From<&'a Habit> for HabitSnapshot<'a> {
    fn from(habit: &'a Habit) -> Self {
        Self {
            id: habit.id,
            name: &habit.name,
            category: habit.category.to_string(),
            current_streak: habit.current_streak,
            longest_streak: habit.longest_streak,
            consistency_rate: habit.consistency_rate,
            total_completions: habit.total_completions,
        }
    }
}

/// Completion counts per weekday, Monday first.
fn weekday_distribution(completions: &[Completion]) -> BTreeMap<u32, (String, i64)> {
    let mut counts = BTreeMap::new();
    for c in completions {
        counts
            .entry(c.completed_on.weekday().num_days_from_monday())
            .or_insert_with(|| (weekday_name(c.completed_on).to_string(), 0))
            .1 += 1;
    }
    counts
}

fn weekday_json(completions: &[Completion]) -> Value {
    let map: serde_json::Map<String, Value> = weekday_distribution(completions)
        .into_values()
        .map(|(name, count)| (name, json!(count)))
        .collect();
    Value::Object(map)
}

#[derive(Clone)]
pub struct CoachService {
    model: Option<Arc<dyn LanguageModel>>,
    model_name: String,
    cache: Cache<String, AiResponse>,
}

impl CoachService {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, model_name: impl Into<String>) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(CACHE_TTL)
            .build();
        Self {
            model,
            model_name: model_name.into(),
            cache,
        }
    }

    /// Coach backed by the Anthropic API when a key is configured, otherwise unavailable.
    pub fn from_config(config: &Config) -> Result<Self, AiProviderError> {
        let model: Option<Arc<dyn LanguageModel>> = match &config.anthropic_api_key {
            Some(key) => Some(Arc::new(AnthropicClient::new(key.clone(), &config.ai_model)?)),
            None => {
                info!("ANTHROPIC_API_KEY not set; AI coach disabled");
                None
            }
        };
        Ok(Self::new(model, &config.ai_model))
    }

    pub fn status(&self) -> AiStatus {
        AiStatus {
            available: self.model.is_some(),
            model: self
                .model
                .as_ref()
                .map(|m| m.model_name().to_string())
                .unwrap_or_else(|| self.model_name.clone()),
            cache_entries: self.cache.entry_count(),
        }
    }

    fn ensure_allowed(&self, user: &User) -> Result<&dyn LanguageModel, CoachError> {
        if !user.allows_ai() {
            return Err(CoachError::OptedOut);
        }
        self.model.as_deref().ok_or(CoachError::Unavailable)
    }

    async fn generate(
        &self,
        model: &dyn LanguageModel,
        key: String,
        prompt: String,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        if let Some(hit) = self.cache.get(&key).await {
            debug!(key = %key, "AI cache hit");
            return Ok(AiResponse { cached: true, ..hit });
        }

        let data: Value = ask_json(model, SYSTEM_PROMPT, &prompt).await?;
        let response = AiResponse {
            data,
            generated_at: now,
            cached: false,
        };
        self.cache.insert(key, response.clone()).await;
        Ok(response)
    }

    async fn context(
        pool: &SqlitePool,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Habit>, Vec<Completion>), CoachError> {
        let habits = Habit::find_active_by_user(pool, user.id).await?;
        let completions =
            AnalyticsService::recent_completions(pool, user.id, day_of(now), HISTORY_DAYS).await?;
        Ok((habits, completions))
    }

    pub async fn insights(
        &self,
        pool: &SqlitePool,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let (habits, completions) = Self::context(pool, user, now).await?;
        let snapshots: Vec<HabitSnapshot> = habits.iter().map(HabitSnapshot::from).collect();

        let prompt = format!(
            "Analyse this user's habits over the last {HISTORY_DAYS} days.\n\
             Level: {level}, total XP: {xp}.\n\
             Habits: {habits}\n\
             Completions by weekday: {weekdays}\n\
             Completions in period: {count}\n\n\
             Respond with JSON: {{\"summary\": string, \"strengths\": [string], \
             \"improvements\": [string], \"habit_recommendations\": \
             [{{\"habit_id\": string, \"type\": \"optimize\"|\"maintain\"|\"rethink\", \
             \"recommendation\": string}}]}}",
            level = user.level,
            xp = user.total_xp,
            habits = json!(snapshots),
            weekdays = weekday_json(&completions),
            count = completions.len(),
        );
        self.generate(model, format!("{}:insights", user.id), prompt, now).await
    }

    pub async fn suggestions(
        &self,
        pool: &SqlitePool,
        user: &User,
        request: SuggestionRequest,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let habits = Habit::find_active_by_user(pool, user.id).await?;
        let existing: Vec<&str> = habits.iter().map(|h| h.name.as_str()).collect();

        let prompt = format!(
            "Suggest up to five new habits for this user.\n\
             Existing habits: {existing}\n\
             Goals: {goals}\n\
             Preferences: {preferences}\n\n\
             Respond with JSON: {{\"suggestions\": [{{\"name\": string, \"category\": string, \
             \"frequency\": \"daily\"|\"weekly\", \"reason\": string, \"difficulty\": 1-5}}]}}",
            existing = json!(existing),
            goals = json!(request.goals),
            preferences = request.preferences,
        );
        let key = format!(
            "{}:suggestions:{}:{}",
            user.id,
            request.goals.join("|"),
            request.preferences
        );
        self.generate(model, key, prompt, now).await
    }

    pub async fn patterns(
        &self,
        pool: &SqlitePool,
        user: &User,
        habit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let habit = Habit::find_for_user(pool, habit_id, user.id)
            .await?
            .ok_or(CoachError::HabitNotFound)?;
        let completions =
            Completion::find_recent_for_habit(pool, habit_id, PATTERN_HISTORY_LIMIT).await?;
        if completions.len() < MIN_PATTERN_COMPLETIONS {
            return Err(CoachError::InsufficientData(format!(
                "at least {MIN_PATTERN_COMPLETIONS} completions are needed to analyse patterns"
            )));
        }

        let hours: Vec<u32> = completions
            .iter()
            .map(|c| c.completed_at.hour())
            .collect();
        let moods: Vec<i64> = completions.iter().filter_map(|c| c.mood).collect();
        let prompt = format!(
            "Analyse the completion pattern of the habit {habit}.\n\
             Completions by weekday: {weekdays}\n\
             Completion hours (UTC): {hours}\n\
             Reported moods (1-5): {moods}\n\n\
             Respond with JSON: {{\"best_days\": [string], \"best_time\": string, \
             \"consistency_notes\": string, \"recommendations\": [string]}}",
            habit = json!(HabitSnapshot::from(&habit)),
            weekdays = weekday_json(&completions),
            hours = json!(hours),
            moods = json!(moods),
        );
        self.generate(model, format!("{}:patterns:{}", user.id, habit_id), prompt, now)
            .await
    }

    pub async fn motivation(
        &self,
        pool: &SqlitePool,
        user: &User,
        context: &str,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let (habits, completions) = Self::context(pool, user, now).await?;
        let best_streak = habits.iter().map(|h| h.current_streak).max().unwrap_or(0);

        let prompt = format!(
            "Write a short motivational message for a {context} check-in.\n\
             Name: {name}. Level {level}. Active habits: {habit_count}. \
             Best current streak: {best_streak} days. \
             Completions in the last {HISTORY_DAYS} days: {count}.\n\n\
             Respond with JSON: {{\"message\": string, \"tip\": string, \
             \"focus_habit\": string|null}}",
            name = user.name,
            level = user.level,
            habit_count = habits.len(),
            count = completions.len(),
        );
        self.generate(model, format!("{}:motivation:{}", user.id, context), prompt, now)
            .await
    }

    pub async fn mood_correlation(
        &self,
        pool: &SqlitePool,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let (habits, completions) = Self::context(pool, user, now).await?;
        let names: BTreeMap<Uuid, &str> = habits.iter().map(|h| (h.id, h.name.as_str())).collect();
        let samples: Vec<Value> = completions
            .iter()
            .filter_map(|c| {
                c.mood.map(|mood| {
                    json!({
                        "habit": names.get(&c.habit_id).copied().unwrap_or("archived habit"),
                        "day": c.completed_on,
                        "mood": mood,
                        "difficulty": c.difficulty,
                    })
                })
            })
            .collect();
        if samples.len() < MIN_MOOD_SAMPLES {
            return Err(CoachError::InsufficientData(format!(
                "at least {MIN_MOOD_SAMPLES} completions with a mood rating are needed"
            )));
        }

        let prompt = format!(
            "Find correlations between habits and reported mood (1-5).\n\
             Samples: {samples}\n\n\
             Respond with JSON: {{\"correlations\": [{{\"habit\": string, \"effect\": \
             \"positive\"|\"neutral\"|\"negative\", \"explanation\": string}}], \
             \"summary\": string}}",
            samples = Value::Array(samples),
        );
        self.generate(model, format!("{}:mood", user.id), prompt, now).await
    }

    pub async fn coaching(
        &self,
        pool: &SqlitePool,
        user: &User,
        request: CoachingRequest,
        now: DateTime<Utc>,
    ) -> Result<AiResponse, CoachError> {
        let model = self.ensure_allowed(user)?;
        let challenge = request
            .challenge
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "Stay consistent with your habits".to_string());
        let context = request.context.unwrap_or_else(|| "coaching".to_string());
        let (habits, _) = Self::context(pool, user, now).await?;
        let snapshots: Vec<HabitSnapshot> = habits.iter().map(HabitSnapshot::from).collect();

        let prompt = format!(
            "Give personalised coaching for this challenge: {challenge}\n\
             Context: {context}\n\
             Habits: {habits}\n\n\
             Respond with JSON: {{\"advice\": string, \"action_steps\": [string], \
             \"encouragement\": string}}",
            habits = json!(snapshots),
        );
        let key = format!("{}:coaching:{}:{}", user.id, context, challenge);
        let mut response = self.generate(model, key, prompt, now).await?;
        if let Value::Object(map) = &mut response.data {
            map.insert("challenge".to_string(), json!(challenge));
            map.insert("coaching_type".to_string(), json!("personalized"));
        }
        Ok(response)
    }

    /// Pattern analysis and general insights merged into habit-specific recommendations.
    pub async fn optimize(
        &self,
        pool: &SqlitePool,
        user: &User,
        habit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Optimization, CoachError> {
        let patterns = match self.patterns(pool, user, habit_id, now).await {
            Ok(response) => Some(response.data),
            Err(CoachError::InsufficientData(_)) => None,
            Err(e) => return Err(e),
        };
        let insights = self.insights(pool, user, now).await?.data;

        let mut recommendations: Vec<Value> = patterns
            .as_ref()
            .and_then(|p| p.get("recommendations"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let target = habit_id.to_string();
        if let Some(recs) = insights.get("habit_recommendations").and_then(Value::as_array) {
            recommendations.extend(
                recs.iter()
                    .filter(|r| {
                        r.get("habit_id").and_then(Value::as_str) == Some(target.as_str())
                            || r.get("type").and_then(Value::as_str) == Some("optimize")
                    })
                    .cloned(),
            );
        }

        Ok(Optimization {
            patterns,
            insights: Some(insights),
            recommendations,
            generated_at: now,
        })
    }
}
