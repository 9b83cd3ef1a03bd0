//! Records exchanged with a backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ContentId, UserId, UserRole};

/// The authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
}

impl AuthUser {
    /// Local part of the email, used when no display name is set
    pub fn email_prefix(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

/// A signed-in session; tokens are only present for hosted backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: AuthUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn local(user: AuthUser) -> Self {
        Self { user, access_token: None, refresh_token: None }
    }
}

/// Role and faction of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub faction: Option<String>,
}

/// Name and points as kept on the score table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreInfo {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub points: i64,
}

/// Merged profile held in the session state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub role: UserRole,
    pub faction: Option<String>,
    /// Display name chosen by the user; the score table's `username` holds the login email
    pub username: Option<String>,
    pub points: i64,
}

impl Profile {
    pub fn merge(record: ProfileRecord, score: Option<ScoreInfo>) -> Self {
        let score = score.unwrap_or_default();
        Self {
            role: record.role,
            faction: record.faction,
            username: score.full_name.filter(|n| !n.trim().is_empty()),
            points: score.points,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// A row of the personal leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub points: i64,
}

impl LeaderboardRow {
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.username.split('@').next().unwrap_or(&self.username),
        }
    }
}

/// Aggregated standing of a faction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionStanding {
    pub faction: String,
    #[serde(default)]
    pub total_members: i64,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub average_score: f64,
}

/// An earned achievement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub earned_at: DateTime<Utc>,
}

/// A time-boxed team challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ContentId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub target_category_id: Option<ContentId>,
    #[serde(default)]
    pub reward_points: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
}

/// Create or update a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    pub title: String,
    pub description: String,
    pub order: i64,
}

/// Create or update a chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    pub category_id: ContentId,
    pub title: String,
    pub description: String,
    pub order: i64,
}

/// Create or update a section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    pub chapter_id: ContentId,
    pub title: String,
    pub order: i64,
}

/// Create or update a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    pub section_id: ContentId,
    pub title: String,
    pub order: i64,
    pub video_url: Option<String>,
    pub document_url: Option<String>,
    pub content_markdown: Option<String>,
    pub quiz_question: Option<String>,
    pub quiz_options: Option<Vec<String>>,
    pub correct_answer_index: Option<usize>,
    pub points: Option<u32>,
}

/// Create or update a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    pub title: String,
    pub description: String,
    pub target_category_id: Option<ContentId>,
    pub reward_points: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
}

/// Content level addressed by an admin delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Category,
    Chapter,
    Section,
    Block,
    Challenge,
}

impl ContentKind {
    /// Table holding rows of this kind
    pub fn table(self) -> &'static str {
        match self {
            ContentKind::Category => "categories",
            ContentKind::Chapter => "chapters",
            ContentKind::Section => "sections",
            ContentKind::Block => "blocks",
            ContentKind::Challenge => "challenges",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "category" => Ok(ContentKind::Category),
            "chapter" => Ok(ContentKind::Chapter),
            "section" => Ok(ContentKind::Section),
            "block" => Ok(ContentKind::Block),
            "challenge" => Ok(ContentKind::Challenge),
            other => Err(format!("unknown content kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContentKind::Category => "category",
            ContentKind::Chapter => "chapter",
            ContentKind::Section => "section",
            ContentKind::Block => "block",
            ContentKind::Challenge => "challenge",
        };
        write!(f, "{}", name)
    }
}
