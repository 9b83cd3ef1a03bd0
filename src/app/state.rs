//! Session state held by the controller

use std::collections::HashSet;

use crate::backend::{Achievement, AuthUser, Challenge, Profile};
use crate::learning::achievements::AchievementCode;
use crate::learning::{LearningMap, ProgressState};
use crate::types::{BlockId, Loadable, Notification};

use super::view::ViewMachine;

#[derive(Debug, Default)]
pub struct AppState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub map: LearningMap,
    pub progress: ProgressState,
    pub view: ViewMachine,
    /// Block the learner last opened, used by "continue learning"
    pub last_viewed_block: Option<BlockId>,
    /// Inline error for the course region when loading failed
    pub course_error: Option<String>,
    pub achievements: Loadable<Vec<Achievement>>,
    /// Codes already earned, so they are not granted twice
    pub earned: HashSet<AchievementCode>,
    pub active_challenges: Loadable<Vec<Challenge>>,
    pub admin_challenges: Loadable<Vec<Challenge>>,
    notifications: Vec<Notification>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    /// Name shown in greetings: chosen display name, else the email's local part
    pub fn display_name(&self) -> Option<String> {
        let user = self.user.as_ref()?;
        let chosen = self.profile.as_ref().and_then(|p| p.username.clone());
        Some(chosen.unwrap_or_else(|| user.email_prefix().to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| p.is_admin())
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Forget everything tied to the signed-in user
    pub fn clear_session(&mut self) {
        self.user = None;
        self.profile = None;
        self.map.clear();
        self.progress.clear();
        self.last_viewed_block = None;
        self.course_error = None;
        self.achievements = Loadable::Idle;
        self.earned.clear();
        self.active_challenges = Loadable::Idle;
        self.admin_challenges = Loadable::Idle;
    }
}
