//! Writes the TypeScript declarations shared with the web client.

use std::{env, fs, path::PathBuf};

use ts_rs::TS;

fn generate_types_content() -> String {
    let header =
        "// This file was generated by `generate_types`. Do not edit this file manually.\n\n";
    let decls = [
        utils::response::ApiResponse::<()>::decl(),
        db::models::user::Theme::decl(),
        db::models::user::NotificationPreferences::decl(),
        db::models::user::PrivacySettings::decl(),
        db::models::user::User::decl(),
        db::models::user::CreateUser::decl(),
        db::models::user::UpdateUser::decl(),
        db::models::habit::HabitCategory::decl(),
        db::models::habit::HabitFrequency::decl(),
        db::models::habit::Habit::decl(),
        db::models::habit::HabitWithCompletions::decl(),
        db::models::habit::HabitFilter::decl(),
        db::models::habit::CreateHabit::decl(),
        db::models::habit::UpdateHabit::decl(),
        db::models::completion::Completion::decl(),
        db::models::completion::CompleteHabit::decl(),
        db::models::xp_transaction::XpSource::decl(),
        db::models::xp_transaction::XpTransaction::decl(),
        db::models::circle::MemberRole::decl(),
        db::models::circle::CommunityCircle::decl(),
        db::models::circle::CircleMember::decl(),
        db::models::circle::CircleMemberProfile::decl(),
        db::models::circle::CircleSummary::decl(),
        db::models::circle::CreateCircle::decl(),
        db::models::circle_message::CircleMessage::decl(),
        db::models::circle_message::CircleMessageView::decl(),
        db::models::circle_message::PostMessage::decl(),
        db::models::circle_event::CircleEvent::decl(),
        db::models::circle_event::CreateCircleEvent::decl(),
        db::models::challenge::ChallengeType::decl(),
        db::models::challenge::CircleChallenge::decl(),
        db::models::challenge::ChallengeParticipant::decl(),
        db::models::challenge::ChallengeWithParticipants::decl(),
        db::models::challenge::CreateChallenge::decl(),
        services::services::gamification::Milestone::decl(),
        services::services::gamification::LevelInfo::decl(),
        services::services::gamification::XpOutcome::decl(),
        services::services::gamification::CompletionOutcome::decl(),
        services::services::gamification::ForgiveHabit::decl(),
        services::services::gamification::ForgivenessOutcome::decl(),
        services::services::gamification::AddXp::decl(),
        services::services::gamification::GamificationData::decl(),
        services::services::analytics::Overview::decl(),
        services::services::analytics::TrendPoint::decl(),
        services::services::analytics::WeeklySummary::decl(),
        services::services::analytics::HabitPerformance::decl(),
        services::services::analytics::ConsistencyDay::decl(),
        services::services::community::CircleListing::decl(),
        services::services::community::CircleDetails::decl(),
        services::services::community::JoinCircle::decl(),
        services::services::community::MessageStats::decl(),
        services::services::community::LeaderboardEntry::decl(),
        services::services::community::LeaderboardOptOut::decl(),
        services::services::community::UpdateChallengeProgress::decl(),
        services::services::community::ProgressOutcome::decl(),
        services::services::coach::AiStatus::decl(),
        services::services::coach::AiResponse::decl(),
        services::services::coach::SuggestionRequest::decl(),
        services::services::coach::CoachingRequest::decl(),
        services::services::coach::Optimization::decl(),
        server::routes::health::HealthStatus::decl(),
        server::routes::habits::StatsPeriod::decl(),
        server::routes::habits::PeriodStats::decl(),
        server::routes::habits::HabitStatsResponse::decl(),
        server::routes::habits::Pagination::decl(),
        server::routes::habits::CompletionPage::decl(),
        server::routes::habits::RecalculateResult::decl(),
        server::routes::community::LeaderboardOptOutStatus::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|d| {
            let trimmed = d.trim_start();
            if trimmed.starts_with("export") {
                trimmed.to_string()
            } else {
                format!("export {trimmed}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{header}{body}\n")
}

fn main() {
    let check_mode = env::args().any(|arg| arg == "--check");
    let shared_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../shared");
    let types_path = shared_path.join("types.ts");
    let generated = generate_types_content();

    if check_mode {
        let current = fs::read_to_string(&types_path).unwrap_or_default();
        if current == generated {
            println!("✅ shared/types.ts is up to date.");
            std::process::exit(0);
        } else {
            eprintln!("❌ shared/types.ts is out of date. Run `cargo run --bin generate_types`.");
            std::process::exit(1);
        }
    }

    if let Err(e) = fs::create_dir_all(&shared_path) {
        eprintln!("Failed to create {}: {}", shared_path.display(), e);
        std::process::exit(1);
    }
    if let Err(e) = fs::write(&types_path, generated) {
        eprintln!("Failed to write {}: {}", types_path.display(), e);
        std::process::exit(1);
    }
    println!("✅ TypeScript types generated in {}", types_path.display());
}
