//! View state machine
//!
//! Every screen of the client is a [`View`]. Views change only through
//! [`ViewMachine::apply`], which looks the pair (current view, event) up in a
//! fixed transition table and rejects anything not listed there.

use thiserror::Error;
use tracing::debug;

use crate::types::{AuthMode, BlockId, ContentId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("Cannot {event} from {from}")]
    IllegalTransition { from: String, event: String },
}

/// Media opened in the full-screen viewer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    pub block_id: BlockId,
}

/// Sub-views of the learning area
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseView {
    CategorySelection,
    ChapterSelection { category: ContentId },
    ChapterDetail { category: ContentId, chapter: ContentId, block: Option<BlockId> },
}

/// Drill-down levels of the admin area
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminView {
    Categories,
    Chapters { category: ContentId },
    Sections { category: ContentId, chapter: ContentId },
    Blocks { category: ContentId, chapter: ContentId, section: ContentId },
    Challenges,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Landing,
    Auth { mode: AuthMode },
    /// Signed in, but no faction chosen yet
    FactionSelection,
    Main(CourseView),
    Profile,
    Admin(AdminView),
    Viewer { media: MediaRef, return_to: Box<View> },
}

impl View {
    pub fn name(&self) -> &'static str {
        match self {
            View::Landing => "landing",
            View::Auth { .. } => "auth",
            View::FactionSelection => "faction selection",
            View::Main(CourseView::CategorySelection) => "category selection",
            View::Main(CourseView::ChapterSelection { .. }) => "chapter selection",
            View::Main(CourseView::ChapterDetail { .. }) => "chapter detail",
            View::Profile => "profile",
            View::Admin(_) => "admin",
            View::Viewer { .. } => "viewer",
        }
    }

    /// Views only reachable with a signed-in user
    pub fn requires_session(&self) -> bool {
        !matches!(self, View::Landing | View::Auth { .. })
    }
}

/// Requests to move between views
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    OpenAuth(AuthMode),
    ToggleAuthMode,
    BackToLanding,
    SignedIn { needs_faction: bool },
    FactionChosen,
    SignedOut,
    SelectCategory(ContentId),
    SelectChapter { category: ContentId, chapter: ContentId, block: Option<BlockId> },
    SelectBlock(BlockId),
    BackToCategories,
    BackToChapters,
    OpenProfile,
    OpenAdmin,
    AdminDrill(AdminView),
    BackToMain,
    OpenViewer(MediaRef),
    CloseViewer,
}

impl Navigation {
    fn name(&self) -> &'static str {
        match self {
            Navigation::OpenAuth(_) => "open auth",
            Navigation::ToggleAuthMode => "toggle auth mode",
            Navigation::BackToLanding => "go back to landing",
            Navigation::SignedIn { .. } => "sign in",
            Navigation::FactionChosen => "choose a faction",
            Navigation::SignedOut => "sign out",
            Navigation::SelectCategory(_) => "select a category",
            Navigation::SelectChapter { .. } => "select a chapter",
            Navigation::SelectBlock(_) => "select a block",
            Navigation::BackToCategories => "go back to categories",
            Navigation::BackToChapters => "go back to chapters",
            Navigation::OpenProfile => "open profile",
            Navigation::OpenAdmin => "open admin",
            Navigation::AdminDrill(_) => "navigate admin",
            Navigation::BackToMain => "go back to courses",
            Navigation::OpenViewer(_) => "open viewer",
            Navigation::CloseViewer => "close viewer",
        }
    }
}

/// The transition table. `None` means the move is not allowed.
pub fn transition(current: &View, event: &Navigation) -> Option<View> {
    use CourseView::*;
    use Navigation as N;

    let next = match (current, event) {
        (_, N::SignedOut) => View::Landing,

        (View::Landing, N::OpenAuth(mode)) => View::Auth { mode: *mode },
        (View::Auth { mode }, N::ToggleAuthMode) => View::Auth { mode: mode.toggled() },
        (View::Auth { .. }, N::BackToLanding) => View::Landing,
        (View::Landing | View::Auth { .. }, N::SignedIn { needs_faction: true }) => View::FactionSelection,
        (View::Landing | View::Auth { .. }, N::SignedIn { needs_faction: false }) => View::Main(CategorySelection),
        (View::FactionSelection, N::FactionChosen) => View::Main(CategorySelection),

        (View::Main(_), N::SelectCategory(category)) => View::Main(ChapterSelection { category: category.clone() }),
        (View::Main(_) | View::Profile, N::SelectChapter { category, chapter, block }) => View::Main(ChapterDetail {
            category: category.clone(),
            chapter: chapter.clone(),
            block: block.clone(),
        }),
        (View::Main(ChapterDetail { category, chapter, .. }), N::SelectBlock(block)) => View::Main(ChapterDetail {
            category: category.clone(),
            chapter: chapter.clone(),
            block: Some(block.clone()),
        }),
        (View::Main(_), N::BackToCategories) => View::Main(CategorySelection),
        (View::Main(ChapterDetail { category, .. }), N::BackToChapters) => {
            View::Main(ChapterSelection { category: category.clone() })
        }

        (View::Main(_) | View::Admin(_), N::OpenProfile) => View::Profile,
        (View::Main(_) | View::Profile, N::OpenAdmin) => View::Admin(AdminView::Categories),
        (View::Admin(_), N::AdminDrill(target)) => View::Admin(target.clone()),
        (View::Profile | View::Admin(_), N::BackToMain) => View::Main(CategorySelection),

        (View::Main(ChapterDetail { .. }), N::OpenViewer(media)) => {
            View::Viewer { media: media.clone(), return_to: Box::new(current.clone()) }
        }
        (View::Viewer { return_to, .. }, N::CloseViewer) => (**return_to).clone(),

        _ => return None,
    };
    Some(next)
}

/// Holds the current view and applies navigation events to it
#[derive(Debug, Clone)]
pub struct ViewMachine {
    current: View,
}

impl Default for ViewMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewMachine {
    pub fn new() -> Self {
        Self { current: View::Landing }
    }

    pub fn current(&self) -> &View {
        &self.current
    }

    /// Apply an event; on rejection the current view is left unchanged
    pub fn apply(&mut self, event: Navigation) -> Result<&View, ViewError> {
        match transition(&self.current, &event) {
            Some(next) => {
                debug!("View {} -> {} ({})", self.current.name(), next.name(), event.name());
                self.current = next;
                Ok(&self.current)
            }
            None => Err(ViewError::IllegalTransition {
                from: self.current.name().to_string(),
                event: event.name().to_string(),
            }),
        }
    }

    /// Whether `event` would be accepted from the current view
    pub fn can_apply(&self, event: &Navigation) -> bool {
        transition(&self.current, event).is_some()
    }

    pub fn reset(&mut self) {
        self.current = View::Landing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in() -> ViewMachine {
        let mut vm = ViewMachine::new();
        vm.apply(Navigation::SignedIn { needs_faction: false }).unwrap();
        vm
    }

    #[test]
    fn test_auth_flow() {
        let mut vm = ViewMachine::new();
        assert_eq!(vm.current(), &View::Landing);

        vm.apply(Navigation::OpenAuth(AuthMode::Login)).unwrap();
        vm.apply(Navigation::ToggleAuthMode).unwrap();
        assert_eq!(vm.current(), &View::Auth { mode: AuthMode::Register });

        vm.apply(Navigation::SignedIn { needs_faction: true }).unwrap();
        assert_eq!(vm.current(), &View::FactionSelection);
        vm.apply(Navigation::FactionChosen).unwrap();
        assert_eq!(vm.current(), &View::Main(CourseView::CategorySelection));
    }

    #[test]
    fn test_illegal_transition_leaves_view_unchanged() {
        let mut vm = ViewMachine::new();
        let err = vm.apply(Navigation::SelectBlock("b1".into())).unwrap_err();
        assert!(matches!(err, ViewError::IllegalTransition { .. }));
        assert_eq!(vm.current(), &View::Landing);

        let mut vm = signed_in();
        assert!(vm.apply(Navigation::BackToChapters).is_err());
        assert_eq!(vm.current(), &View::Main(CourseView::CategorySelection));
        assert!(vm.apply(Navigation::FactionChosen).is_err());
    }

    #[test]
    fn test_course_drill_down() {
        let mut vm = signed_in();
        vm.apply(Navigation::SelectCategory("c1".into())).unwrap();
        vm.apply(Navigation::SelectChapter { category: "c1".into(), chapter: "ch1".into(), block: None }).unwrap();
        vm.apply(Navigation::SelectBlock("b2".into())).unwrap();
        assert_eq!(
            vm.current(),
            &View::Main(CourseView::ChapterDetail {
                category: "c1".into(),
                chapter: "ch1".into(),
                block: Some("b2".into())
            })
        );

        vm.apply(Navigation::BackToChapters).unwrap();
        assert_eq!(vm.current(), &View::Main(CourseView::ChapterSelection { category: "c1".into() }));
    }

    #[test]
    fn test_viewer_returns_to_origin() {
        let mut vm = signed_in();
        vm.apply(Navigation::SelectChapter { category: "c".into(), chapter: "ch".into(), block: Some("b".into()) })
            .unwrap();
        let origin = vm.current().clone();

        let media = MediaRef { kind: MediaKind::Video, url: "https://cdn.example/v.mp4".into(), block_id: "b".into() };
        vm.apply(Navigation::OpenViewer(media)).unwrap();
        assert!(matches!(vm.current(), View::Viewer { .. }));
        assert!(vm.apply(Navigation::OpenProfile).is_err());

        vm.apply(Navigation::CloseViewer).unwrap();
        assert_eq!(vm.current(), &origin);
    }

    #[test]
    fn test_sign_out_from_anywhere() {
        let mut vm = signed_in();
        vm.apply(Navigation::OpenAdmin).unwrap();
        vm.apply(Navigation::AdminDrill(AdminView::Challenges)).unwrap();
        vm.apply(Navigation::SignedOut).unwrap();
        assert_eq!(vm.current(), &View::Landing);
        assert!(!vm.current().requires_session());
    }
}
