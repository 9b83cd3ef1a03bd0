//! Learning content model
//!
//! The curriculum is a tree: categories hold chapters, chapters hold
//! sections, sections hold blocks. Siblings arrive from the backend already
//! sorted by their `order` field and are never re-sorted here.
//!
//! Gating logic works on the flattened projection built by [`flatten`].

pub mod achievements;
pub mod completion;
pub mod flatten;
pub mod progress;
pub mod quiz;
pub mod unlock;

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{BlockId, ContentId};

pub use flatten::{FlatBlockEntry, LearningMap};
pub use progress::{ProgressSnapshot, ProgressState};
pub use unlock::{EmptyPredecessorPolicy, UnlockEvaluator};

/// Top-level grouping of chapters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(deserialize_with = "de_id")]
    pub id: ContentId,
    pub title: String,
    #[serde(default, deserialize_with = "de_text")]
    pub description: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "de_children")]
    pub chapters: Vec<Chapter>,
}

/// A chapter inside a category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(deserialize_with = "de_id")]
    pub id: ContentId,
    pub title: String,
    #[serde(default, deserialize_with = "de_text")]
    pub description: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "de_children")]
    pub sections: Vec<Section>,
}

/// A section inside a chapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(deserialize_with = "de_id")]
    pub id: ContentId,
    pub title: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "de_children")]
    pub blocks: Vec<Block>,
}

/// The smallest unit a learner completes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(deserialize_with = "de_id")]
    pub id: BlockId,
    pub title: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer_index: Option<usize>,
    /// Points granted on first completion; `None` uses the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

impl Block {
    /// Quiz attached to this block, if it has a question
    pub fn quiz(&self) -> Option<quiz::Quiz<'_>> {
        let question = self.quiz_question.as_deref().filter(|q| !q.trim().is_empty())?;
        Some(quiz::Quiz {
            question,
            options: self.quiz_options.as_deref().unwrap_or(&[]),
            correct_index: self.correct_answer_index,
        })
    }

    /// Effective points for first completion
    pub fn effective_points(&self, default_points: u32) -> u32 {
        self.points.unwrap_or(default_points)
    }

    /// Short label for the kind of content this block carries
    pub fn kind_label(&self) -> &'static str {
        if self.quiz().is_some() {
            "quiz"
        } else if self.document_url.is_some() {
            "document"
        } else if self.video_url.is_some() {
            "video"
        } else {
            "text"
        }
    }
}

impl Category {
    pub fn find_chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }
}

impl Chapter {
    pub fn find_section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }
}

/// Ids arrive as strings from some backends and as integers from others
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

/// `null` children are treated as an empty list
fn de_children<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_nested_tree_with_missing_children() {
        let json = r#"[
            {"id": 1, "title": "Basics", "description": null, "order": 1, "chapters": [
                {"id": "c1", "title": "Intro", "order": 1, "sections": null},
                {"id": "c2", "title": "Next", "order": 2, "sections": [
                    {"id": "s1", "title": "Part", "order": 1}
                ]}
            ]},
            {"id": 2, "title": "Advanced", "order": 2}
        ]"#;

        let tree: Vec<Category> = serde_json::from_str(json).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "1");
        assert_eq!(tree[0].description, "");
        assert!(tree[0].chapters[0].sections.is_empty());
        assert!(tree[0].chapters[1].sections[0].blocks.is_empty());
        assert!(tree[1].chapters.is_empty());
    }

    #[test]
    fn test_block_kind_and_points() {
        let mut block = Block { id: "b".into(), title: "B".into(), ..Default::default() };
        assert_eq!(block.kind_label(), "text");
        assert_eq!(block.effective_points(10), 10);

        block.video_url = Some("https://example.com/v.mp4".into());
        assert_eq!(block.kind_label(), "video");

        block.quiz_question = Some("   ".into());
        assert!(block.quiz().is_none());

        block.quiz_question = Some("Which?".into());
        block.points = Some(0);
        assert_eq!(block.kind_label(), "quiz");
        assert_eq!(block.effective_points(10), 0);
    }
}
