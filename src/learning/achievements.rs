//! Achievement rules evaluated after a block is completed

use serde::{Deserialize, Serialize};

use super::completion::CompletionReport;
use super::{LearningMap, ProgressState, UnlockEvaluator};

/// Achievements the learning flow can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AchievementCode {
    #[serde(rename = "SCORE_FIRST_POINTS")]
    ScoreFirstPoints,
    #[serde(rename = "COMPLETE_FIRST_BLOCK")]
    CompleteFirstBlock,
    #[serde(rename = "COMPLETE_FIRST_CHAPTER")]
    CompleteFirstChapter,
}

impl AchievementCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AchievementCode::ScoreFirstPoints => "SCORE_FIRST_POINTS",
            AchievementCode::CompleteFirstBlock => "COMPLETE_FIRST_BLOCK",
            AchievementCode::CompleteFirstChapter => "COMPLETE_FIRST_CHAPTER",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            AchievementCode::ScoreFirstPoints => "点石成金",
            AchievementCode::CompleteFirstBlock => "初窥门径",
            AchievementCode::CompleteFirstChapter => "学有所成",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AchievementCode::ScoreFirstPoints => "Earned points for the first time",
            AchievementCode::CompleteFirstBlock => "Completed a first content block",
            AchievementCode::CompleteFirstChapter => "Completed every block of a chapter",
        }
    }

    pub fn all() -> &'static [AchievementCode] {
        &[
            AchievementCode::ScoreFirstPoints,
            AchievementCode::CompleteFirstBlock,
            AchievementCode::CompleteFirstChapter,
        ]
    }
}

impl std::fmt::Display for AchievementCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Achievements unlocked by a completion that just succeeded
pub fn earned_by(report: &CompletionReport, map: &LearningMap, progress: &ProgressState) -> Vec<AchievementCode> {
    let mut earned = Vec::new();

    if report.points_awarded.is_some() && progress.awarded_count() == 1 {
        earned.push(AchievementCode::ScoreFirstPoints);
    }
    if progress.completed_count() == 1 {
        earned.push(AchievementCode::CompleteFirstBlock);
    }
    if let Some(entry) = map.entry(&report.block_id) {
        if UnlockEvaluator::new(map, progress).is_chapter_complete(&entry.chapter_id) {
            earned.push(AchievementCode::CompleteFirstChapter);
        }
    }

    earned
}
