//! Plain-text rendering
//!
//! Pure functions from state to text. Nothing here mutates or talks to a
//! backend; the interactive client adds colour on top.

use std::fmt::Write as _;

use crate::app::admin;
use crate::app::leaderboard::LeaderboardPanel;
use crate::app::state::AppState;
use crate::app::view::{AdminView, CourseView, MediaKind, MediaRef, View};
use crate::backend::{Achievement, Challenge};
use crate::faction::{all_factions, faction_info};
use crate::learning::achievements::AchievementCode;
use crate::learning::quiz::Quiz;
use crate::learning::{Block, EmptyPredecessorPolicy, LearningMap, ProgressState, UnlockEvaluator};
use crate::types::{AuthMode, Loadable, Notification};

const RULE: &str = "────────────────────────────────────────";

/// Render whatever the current view is
pub fn render_view(state: &AppState, policy: EmptyPredecessorPolicy) -> String {
    let evaluator = UnlockEvaluator::new(&state.map, &state.progress).with_policy(policy);
    match state.view.current() {
        View::Landing => render_landing(),
        View::Auth { mode } => render_auth(*mode),
        View::FactionSelection => render_faction_selection(),
        View::Main(course) => {
            let mut out = render_header(state, &evaluator);
            if let Some(error) = &state.course_error {
                let _ = writeln!(out, "  ! {}", error);
                return out;
            }
            out.push_str(&match course {
                CourseView::CategorySelection => render_categories(state, &evaluator),
                CourseView::ChapterSelection { category } => render_chapters(&state.map, &evaluator, category),
                CourseView::ChapterDetail { chapter, block, .. } => {
                    render_chapter_detail(&state.map, &state.progress, &evaluator, chapter, block.as_deref())
                }
            });
            out
        }
        View::Profile => render_profile(state, &evaluator),
        View::Admin(view) => render_admin(state, view),
        View::Viewer { media, .. } => render_viewer(media),
    }
}

fn render_landing() -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Questline");
    let _ = writeln!(out, "Learn, level up and win glory for your department.");
    let _ = writeln!(out);
    let _ = writeln!(out, "  login      Sign in to continue your journey");
    let _ = writeln!(out, "  register   Create a new account");
    out
}

/// Landing text plus the public boards a guest can browse
pub fn render_landing_page(panel: &LeaderboardPanel, challenges: &Loadable<Vec<Challenge>>) -> String {
    let mut out = render_landing();
    out.push('\n');
    out.push_str(&render_leaderboard(panel, None));
    out.push_str("\nActive challenges\n");
    out.push_str(&render_loadable(challenges, "challenges", |list| {
        if list.is_empty() {
            return "  No challenge is running right now.\n".to_string();
        }
        list.iter().map(challenge_line).collect()
    }));
    out
}

fn render_auth(mode: AuthMode) -> String {
    match mode {
        AuthMode::Login => "Log in\n  Enter your email and password (or 'register' to create an account)\n".to_string(),
        AuthMode::Register => {
            "Register\n  Enter your name, email and a password of at least 6 characters\n".to_string()
        }
    }
}

fn render_faction_selection() -> String {
    let mut out = String::from("Choose your faction\n");
    for (i, faction) in all_factions().iter().enumerate() {
        let _ = writeln!(out, "  {}. {} ({})", i + 1, faction.name, faction.id);
    }
    out
}

fn render_header(state: &AppState, evaluator: &UnlockEvaluator<'_>) -> String {
    let name = state.display_name().unwrap_or_default();
    let profile = state.profile.clone().unwrap_or_default();
    let faction = faction_info(profile.faction.as_deref());
    format!(
        "{} | {} | {} points | {}% overall\n{}\n",
        name,
        faction.name,
        profile.points,
        evaluator.overall_progress(),
        RULE
    )
}

fn render_categories(state: &AppState, evaluator: &UnlockEvaluator<'_>) -> String {
    let mut out = String::new();
    if state.map.is_empty() {
        out.push_str("  No courses have been published yet.\n");
        return out;
    }

    for (i, category) in state.map.categories().iter().enumerate() {
        let marker = if evaluator.is_category_unlocked(&category.id) { ' ' } else { '#' };
        let _ = writeln!(
            out,
            "{} {}. {} [{}%]  ({})",
            marker,
            i + 1,
            category.title,
            evaluator.category_progress(&category.id),
            category.id
        );
        if !category.description.is_empty() {
            let _ = writeln!(out, "     {}", category.description);
        }
    }

    if let Loadable::Ready(challenges) = &state.active_challenges {
        if !challenges.is_empty() {
            let _ = writeln!(out, "\nActive challenges");
            for challenge in challenges {
                out.push_str(&challenge_line(challenge));
            }
        }
    }
    out
}

fn render_chapters(map: &LearningMap, evaluator: &UnlockEvaluator<'_>, category_id: &str) -> String {
    let category = match map.category(category_id) {
        Some(category) => category,
        None => return "  This category no longer exists.\n".to_string(),
    };

    let mut out = format!("{}\n", category.title);
    if category.chapters.is_empty() {
        out.push_str("  No chapters yet.\n");
    }
    for (i, chapter) in category.chapters.iter().enumerate() {
        let total = map.blocks_in_chapter(&chapter.id).count();
        let status = if evaluator.is_chapter_complete(&chapter.id) { "done" } else { "" };
        let _ = writeln!(out, "  {}. {} ({} blocks) {}  ({})", i + 1, chapter.title, total, status, chapter.id);
    }
    out
}

fn render_chapter_detail(
    map: &LearningMap,
    progress: &ProgressState,
    evaluator: &UnlockEvaluator<'_>,
    chapter_id: &str,
    selected: Option<&str>,
) -> String {
    let chapter = match map.chapter(chapter_id) {
        Some((_, chapter)) => chapter,
        None => return "  This chapter no longer exists.\n".to_string(),
    };

    let mut out = format!("{}\n", chapter.title);
    for section in &chapter.sections {
        let _ = writeln!(out, "  {}", section.title);
        for block in &section.blocks {
            let marker = if selected == Some(block.id.as_str()) {
                '>'
            } else if progress.is_completed(&block.id) {
                'x'
            } else if evaluator.is_block_unlocked(&block.id) {
                ' '
            } else {
                '#'
            };
            let _ = writeln!(out, "   [{}] {} ({}, {})", marker, block.title, block.kind_label(), block.id);
        }
    }

    if let Some(block) = selected.and_then(|id| map.entry(id)) {
        let _ = writeln!(out, "{}", RULE);
        out.push_str(&render_block(&block.block, progress.is_completed(block.id())));
    }
    out
}

/// Body of a single block
pub fn render_block(block: &Block, completed: bool) -> String {
    let mut out = format!("{}{}\n", block.title, if completed { "  (completed)" } else { "" });
    if let Some(url) = &block.video_url {
        let _ = writeln!(out, "  Video: {}", url);
    }
    if let Some(url) = &block.document_url {
        let _ = writeln!(out, "  Document: {}", url);
    }
    if let Some(text) = block.content_markdown.as_deref().filter(|t| !t.trim().is_empty()) {
        let _ = writeln!(out);
        for line in text.lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }
    if let Some(quiz) = block.quiz() {
        let _ = writeln!(out, "\n  Quiz: {}", quiz.question);
        for (i, option) in quiz.options.iter().enumerate() {
            let _ = writeln!(out, "    {}. {}", Quiz::option_label(i), option);
        }
    } else if !completed {
        let _ = writeln!(out, "\n  Mark this block complete when you are done.");
    }
    out
}

fn render_profile(state: &AppState, evaluator: &UnlockEvaluator<'_>) -> String {
    let mut out = String::from("Profile\n");
    let profile = state.profile.clone().unwrap_or_default();
    let faction = faction_info(profile.faction.as_deref());

    if let Some(user) = &state.user {
        let _ = writeln!(out, "  Name:     {}", state.display_name().unwrap_or_default());
        let _ = writeln!(out, "  Email:    {}", user.email);
    }
    let _ = writeln!(out, "  Faction:  {}", faction.name);
    let _ = writeln!(out, "  Role:     {}", profile.role);
    let _ = writeln!(out, "  Points:   {}", profile.points);
    let _ = writeln!(
        out,
        "  Progress: {}% ({} of {} blocks)",
        evaluator.overall_progress(),
        state.progress.completed_count(),
        state.map.total_blocks()
    );
    if profile.username.is_none() {
        let _ = writeln!(out, "  (you can set a display name once)");
    }

    let _ = writeln!(out, "\nAchievements");
    out.push_str(&render_loadable(&state.achievements, "achievements", render_achievements));
    out
}

fn render_achievements(list: &Vec<Achievement>) -> String {
    if list.is_empty() {
        return "  None yet, complete your first block!\n".to_string();
    }
    let mut out = String::new();
    for achievement in list {
        let name = AchievementCode::all()
            .iter()
            .find(|c| c.as_str() == achievement.code)
            .map(|c| c.title())
            .unwrap_or(achievement.name.as_str());
        let _ = writeln!(out, "  * {} ({})", name, achievement.earned_at.format("%Y-%m-%d"));
    }
    out
}

fn render_admin(state: &AppState, view: &AdminView) -> String {
    let mut out = String::from("Admin");
    let path = admin_path(&state.map, view);
    if !path.is_empty() {
        let _ = write!(out, " / {}", path.join(" / "));
    }
    out.push('\n');

    if let AdminView::Challenges = view {
        out.push_str(&render_loadable(&state.admin_challenges, "challenges", |list| {
            if list.is_empty() {
                return "  No challenges.\n".to_string();
            }
            list.iter().map(challenge_line).collect()
        }));
        return out;
    }

    match admin::list_items(&state.map, view) {
        Some(items) if items.is_empty() => out.push_str("  (empty)\n"),
        Some(items) => {
            for item in items {
                let _ = writeln!(out, "  [{}] {} (order {}, {} children)", item.id, item.title, item.order, item.children);
            }
        }
        None => out.push_str("  This item no longer exists.\n"),
    }
    out
}

fn admin_path(map: &LearningMap, view: &AdminView) -> Vec<String> {
    let title_of_category = |id: &str| map.category(id).map(|c| c.title.clone()).unwrap_or_else(|| id.to_string());
    let title_of_chapter = |id: &str| map.chapter(id).map(|(_, c)| c.title.clone()).unwrap_or_else(|| id.to_string());
    match view {
        AdminView::Categories => Vec::new(),
        AdminView::Challenges => vec!["Challenges".to_string()],
        AdminView::Chapters { category } => vec![title_of_category(category)],
        AdminView::Sections { category, chapter } => vec![title_of_category(category), title_of_chapter(chapter)],
        AdminView::Blocks { category, chapter, section } => {
            let section_title = map
                .chapter(chapter)
                .and_then(|(_, ch)| ch.find_section(section))
                .map(|s| s.title.clone())
                .unwrap_or_else(|| section.clone());
            vec![title_of_category(category), title_of_chapter(chapter), section_title]
        }
    }
}

fn challenge_line(challenge: &Challenge) -> String {
    format!(
        "  [{}] {} (+{} points, {} to {}){}\n",
        challenge.id,
        challenge.title,
        challenge.reward_points,
        challenge.start_date.format("%Y-%m-%d"),
        challenge.end_date.format("%Y-%m-%d"),
        if challenge.is_active { "" } else { " finished" }
    )
}

fn render_viewer(media: &MediaRef) -> String {
    let kind = match media.kind {
        MediaKind::Video => "Video",
        MediaKind::Document => "Document",
    };
    format!("{} for block {}\n  {}\n  (back to close)\n", kind, media.block_id, media.url)
}

/// Both leaderboards; `me` is highlighted in the personal board
pub fn render_leaderboard(panel: &LeaderboardPanel, me: Option<&str>) -> String {
    let mut out = String::from("Top learners\n");
    out.push_str(&render_loadable(&panel.personal, "leaderboard", |rows| {
        if rows.is_empty() {
            return "  Nobody has scored yet.\n".to_string();
        }
        let mut out = String::new();
        for (rank, row) in rows.iter().enumerate() {
            let marker = if me == Some(row.user_id.as_str()) { '*' } else { ' ' };
            let _ = writeln!(out, " {}{:>2}. {:<24} {:>6}", marker, rank + 1, row.display_name(), row.points);
        }
        out
    }));

    out.push_str("\nFactions\n");
    out.push_str(&render_loadable(&panel.factions, "faction standings", |rows| {
        if rows.is_empty() {
            return "  No faction has members yet.\n".to_string();
        }
        let mut out = String::new();
        for (rank, row) in rows.iter().enumerate() {
            let info = faction_info(Some(&row.faction));
            let _ = writeln!(
                out,
                "  {:>2}. {:<16} {:>6} points  {:>3} members  avg {:.1}",
                rank + 1,
                info.name,
                row.total_points,
                row.total_members,
                row.average_score
            );
        }
        out
    }));

    if let Some(at) = panel.updated_at {
        let _ = writeln!(out, "  (updated {})", at.format("%H:%M:%S"));
    }
    out
}

pub fn render_notifications(notifications: &[Notification]) -> String {
    notifications.iter().map(|n| format!("{}\n", n)).collect()
}

fn render_loadable<T>(value: &Loadable<T>, what: &str, ready: impl Fn(&T) -> String) -> String {
    match value {
        Loadable::Idle => String::new(),
        Loadable::Loading => format!("  Loading {}...\n", what),
        Loadable::Ready(inner) => ready(inner),
        Loadable::Failed(error) => format!("  ! Could not load {}: {}\n", what, error),
    }
}
