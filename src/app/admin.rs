//! Content administration
//!
//! Admin edits arrive as loosely typed forms (strings straight from the
//! prompt or command line). Each form is validated into a draft before
//! anything is sent to the backend.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::view::AdminView;
use crate::backend::{BlockDraft, CategoryDraft, ChallengeDraft, ChapterDraft, SectionDraft};
use crate::error::{AppError, AppResult};
use crate::learning::LearningMap;
use crate::types::ContentId;

/// Max options a quiz block may carry
pub const MAX_QUIZ_OPTIONS: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct CategoryForm {
    pub id: Option<ContentId>,
    pub title: String,
    pub description: String,
    pub order: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterForm {
    pub id: Option<ContentId>,
    pub category_id: ContentId,
    pub title: String,
    pub description: String,
    pub order: String,
}

#[derive(Debug, Clone, Default)]
pub struct SectionForm {
    pub id: Option<ContentId>,
    pub chapter_id: ContentId,
    pub title: String,
    pub order: String,
}

#[derive(Debug, Clone, Default)]
pub struct BlockForm {
    pub id: Option<ContentId>,
    pub section_id: ContentId,
    pub title: String,
    pub order: String,
    pub video_url: String,
    pub document_url: String,
    pub content_markdown: String,
    pub quiz_question: String,
    pub quiz_options: Vec<String>,
    pub correct_answer_index: String,
    pub points: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChallengeForm {
    pub id: Option<ContentId>,
    pub title: String,
    pub description: String,
    pub target_category_id: String,
    pub reward_points: String,
    pub start_date: String,
    pub end_date: String,
    pub is_active: bool,
}

fn required_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".into()));
    }
    Ok(title.to_string())
}

fn parse_order(order: &str) -> AppResult<i64> {
    let order = order.trim();
    if order.is_empty() {
        return Ok(0);
    }
    order.parse().map_err(|_| AppError::Validation(format!("Order must be a number, got '{}'", order)))
}

fn optional_text(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn required_parent(id: &str, what: &str) -> AppResult<ContentId> {
    optional_text(id).ok_or_else(|| AppError::Validation(format!("A {} must be selected", what)))
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM` (as typed into a datetime field) or a plain date
pub fn parse_datetime(value: &str) -> AppResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(AppError::Validation(format!("Unrecognised date '{}'", value)))
}

pub fn validate_category(form: &CategoryForm) -> AppResult<CategoryDraft> {
    Ok(CategoryDraft {
        id: form.id.clone(),
        title: required_title(&form.title)?,
        description: form.description.trim().to_string(),
        order: parse_order(&form.order)?,
    })
}

pub fn validate_chapter(form: &ChapterForm) -> AppResult<ChapterDraft> {
    Ok(ChapterDraft {
        id: form.id.clone(),
        category_id: required_parent(&form.category_id, "category")?,
        title: required_title(&form.title)?,
        description: form.description.trim().to_string(),
        order: parse_order(&form.order)?,
    })
}

pub fn validate_section(form: &SectionForm) -> AppResult<SectionDraft> {
    Ok(SectionDraft {
        id: form.id.clone(),
        chapter_id: required_parent(&form.chapter_id, "chapter")?,
        title: required_title(&form.title)?,
        order: parse_order(&form.order)?,
    })
}

/// Blank quiz question clears every quiz field; otherwise the quiz needs
/// two or more non-empty options and a correct index inside them.
pub fn validate_block(form: &BlockForm) -> AppResult<BlockDraft> {
    let title = required_title(&form.title)?;
    let order = parse_order(&form.order)?;
    let section_id = required_parent(&form.section_id, "section")?;

    let (quiz_question, quiz_options, correct_answer_index) = match optional_text(&form.quiz_question) {
        None => (None, None, None),
        Some(question) => {
            let options: Vec<String> = form.quiz_options.iter().filter_map(|o| optional_text(o)).collect();
            if options.len() < 2 {
                return Err(AppError::Validation("A quiz needs at least two options".into()));
            }
            if options.len() > MAX_QUIZ_OPTIONS {
                return Err(AppError::Validation(format!("A quiz takes at most {} options", MAX_QUIZ_OPTIONS)));
            }
            let index: usize = form
                .correct_answer_index
                .trim()
                .parse()
                .map_err(|_| AppError::Validation("Correct answer must be an option number".into()))?;
            if index >= options.len() {
                return Err(AppError::Validation(format!(
                    "Correct answer {} is out of range (quiz has {} options)",
                    index,
                    options.len()
                )));
            }
            (Some(question), Some(options), Some(index))
        }
    };

    let points = match form.points.trim() {
        "" => None,
        raw => Some(
            raw.parse::<u32>()
                .map_err(|_| AppError::Validation(format!("Points must be a non-negative number, got '{}'", raw)))?,
        ),
    };

    Ok(BlockDraft {
        id: form.id.clone(),
        section_id,
        title,
        order,
        video_url: optional_text(&form.video_url),
        document_url: optional_text(&form.document_url),
        content_markdown: optional_text(&form.content_markdown),
        quiz_question,
        quiz_options,
        correct_answer_index,
        points,
    })
}

pub fn validate_challenge(form: &ChallengeForm) -> AppResult<ChallengeDraft> {
    let title = required_title(&form.title)?;
    let reward_points: i64 = form
        .reward_points
        .trim()
        .parse()
        .map_err(|_| AppError::Validation("Reward must be a number".into()))?;
    if reward_points < 0 {
        return Err(AppError::Validation("Reward cannot be negative".into()));
    }
    let start_date = parse_datetime(&form.start_date)?;
    let end_date = parse_datetime(&form.end_date)?;
    if end_date <= start_date {
        return Err(AppError::Validation("End date must be after start date".into()));
    }

    Ok(ChallengeDraft {
        id: form.id.clone(),
        title,
        description: form.description.trim().to_string(),
        target_category_id: optional_text(&form.target_category_id),
        reward_points,
        start_date,
        end_date,
        is_active: form.is_active,
    })
}

/// One line of an admin listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminItem {
    pub id: ContentId,
    pub title: String,
    pub order: i64,
    pub children: usize,
}

/// Rows shown at an admin drill-down level; `None` if the parent no longer exists
pub fn list_items(map: &LearningMap, view: &AdminView) -> Option<Vec<AdminItem>> {
    let items = match view {
        AdminView::Categories => map
            .categories()
            .iter()
            .map(|c| AdminItem { id: c.id.clone(), title: c.title.clone(), order: c.order, children: c.chapters.len() })
            .collect(),
        AdminView::Chapters { category } => map
            .category(category)?
            .chapters
            .iter()
            .map(|c| AdminItem { id: c.id.clone(), title: c.title.clone(), order: c.order, children: c.sections.len() })
            .collect(),
        AdminView::Sections { category, chapter } => map
            .category(category)?
            .find_chapter(chapter)?
            .sections
            .iter()
            .map(|s| AdminItem { id: s.id.clone(), title: s.title.clone(), order: s.order, children: s.blocks.len() })
            .collect(),
        AdminView::Blocks { category, chapter, section } => map
            .category(category)?
            .find_chapter(chapter)?
            .find_section(section)?
            .blocks
            .iter()
            .map(|b| AdminItem { id: b.id.clone(), title: b.title.clone(), order: b.order, children: 0 })
            .collect(),
        AdminView::Challenges => Vec::new(),
    };
    Some(items)
}

/// The admin view one level down from `view` into `child_id`
pub fn drill_into(view: &AdminView, child_id: &str) -> Option<AdminView> {
    let child = child_id.to_string();
    match view {
        AdminView::Categories => Some(AdminView::Chapters { category: child }),
        AdminView::Chapters { category } => Some(AdminView::Sections { category: category.clone(), chapter: child }),
        AdminView::Sections { category, chapter } => Some(AdminView::Blocks {
            category: category.clone(),
            chapter: chapter.clone(),
            section: child,
        }),
        AdminView::Blocks { .. } | AdminView::Challenges => None,
    }
}

/// The admin view one level up
pub fn drill_up(view: &AdminView) -> AdminView {
    match view {
        AdminView::Categories | AdminView::Challenges => AdminView::Categories,
        AdminView::Chapters { .. } => AdminView::Categories,
        AdminView::Sections { category, .. } => AdminView::Chapters { category: category.clone() },
        AdminView::Blocks { category, chapter, .. } => {
            AdminView::Sections { category: category.clone(), chapter: chapter.clone() }
        }
    }
}
