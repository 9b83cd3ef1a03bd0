//! Backend access
//!
//! Everything the platform persists goes through [`LearningBackend`]:
//! - `rest`: hosted backend-as-a-service (PostgREST tables, token auth, RPC)
//! - `local`: embedded SQLite database for offline use and tests
//! - `realtime`: websocket listener that turns score-table changes into
//!   [`ScoreEvent`]s
//! - `feed`: in-process broadcast of score events

pub mod feed;
pub mod local;
pub mod models;
pub mod realtime;
pub mod rest;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::BackendResult;
use crate::learning::achievements::AchievementCode;
use crate::learning::{Category, ProgressSnapshot};

pub use feed::{ScoreEvent, ScoreFeed};
pub use local::LocalBackend;
pub use models::*;
pub use rest::RestBackend;

#[cfg(test)]
use mockall::automock;

/// Data access used by the application controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LearningBackend: Send + Sync {
    // ---- auth ----

    /// Create an account together with its profile and score rows
    async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> BackendResult<AuthUser>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Re-establish a stored session, returning the account it belongs to
    async fn restore_session(&self, session: &Session) -> BackendResult<AuthUser>;

    /// Observe session changes (`None` when signed out)
    fn session_changes(&self) -> watch::Receiver<Option<AuthUser>>;

    /// Session currently held, with refreshed tokens if any
    fn current_session(&self) -> Option<Session>;

    /// Score change events pushed by this backend
    fn score_feed(&self) -> ScoreFeed;

    // ---- profile ----

    /// Fetch the profile, creating a default one if the user has none
    async fn get_profile(&self, user_id: &str) -> BackendResult<ProfileRecord>;

    async fn get_score_info(&self, user_id: &str) -> BackendResult<Option<ScoreInfo>>;

    async fn update_faction(&self, user_id: &str, faction: &str) -> BackendResult<ProfileRecord>;

    async fn update_username(&self, user_id: &str, username: &str) -> BackendResult<ScoreInfo>;

    // ---- learning ----

    /// Nested curriculum, siblings sorted by order at every level
    async fn fetch_learning_tree(&self) -> BackendResult<Vec<Category>>;

    async fn fetch_progress(&self, user_id: &str) -> BackendResult<ProgressSnapshot>;

    async fn save_progress(&self, user_id: &str, progress: &ProgressSnapshot) -> BackendResult<()>;

    async fn reset_progress(&self, user_id: &str) -> BackendResult<()>;

    async fn award_points(&self, user_id: &str, amount: u32) -> BackendResult<()>;

    async fn award_achievement(&self, user_id: &str, code: AchievementCode) -> BackendResult<()>;

    async fn fetch_achievements(&self, user_id: &str) -> BackendResult<Vec<Achievement>>;

    // ---- leaderboards ----

    async fn fetch_leaderboard(&self, limit: usize) -> BackendResult<Vec<LeaderboardRow>>;

    async fn fetch_faction_leaderboard(&self) -> BackendResult<Vec<FactionStanding>>;

    // ---- challenges ----

    async fn fetch_active_challenges(&self) -> BackendResult<Vec<Challenge>>;

    async fn fetch_challenges(&self) -> BackendResult<Vec<Challenge>>;

    async fn upsert_challenge(&self, draft: &ChallengeDraft) -> BackendResult<()>;

    /// Settle a challenge: distribute its reward and deactivate it
    async fn finish_challenge(&self, challenge_id: &str) -> BackendResult<()>;

    // ---- content administration ----

    async fn upsert_category(&self, draft: &CategoryDraft) -> BackendResult<()>;

    async fn upsert_chapter(&self, draft: &ChapterDraft) -> BackendResult<()>;

    async fn upsert_section(&self, draft: &SectionDraft) -> BackendResult<()>;

    async fn upsert_block(&self, draft: &BlockDraft) -> BackendResult<()>;

    async fn delete_content(&self, kind: ContentKind, id: &str) -> BackendResult<()>;
}
