//! Application controller
//!
//! [`App`] owns the session state and is the only place that talks to the
//! backend on the user's behalf. Every public action converts its failure
//! into a notification (or an inline placeholder for failed loads) before
//! returning it, so callers only need to render.

pub mod admin;
pub mod leaderboard;
pub mod state;
pub mod view;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{AuthUser, ContentKind, LearningBackend, Profile, Session};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::faction::find_faction;
use crate::learning::achievements::{self, AchievementCode};
use crate::learning::completion::{execute_completion, plan_completion, CompletionDecision, CompletionReport};
use crate::learning::quiz::{Quiz, QuizVerdict};
use crate::learning::{EmptyPredecessorPolicy, ProgressState, UnlockEvaluator};
use crate::types::{BlockId, Loadable, Notification};

use admin::{BlockForm, CategoryForm, ChallengeForm, ChapterForm, SectionForm};
use leaderboard::Leaderboard;
use state::AppState;
use view::{AdminView, CourseView, MediaKind, MediaRef, Navigation, View};

/// Tunables the controller needs from the configuration
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub default_block_points: u32,
    pub empty_predecessor: EmptyPredecessorPolicy,
    pub leaderboard_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self { default_block_points: 10, empty_predecessor: EmptyPredecessorPolicy::Open, leaderboard_limit: 10 }
    }
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_block_points: config.points.default_block_points,
            empty_predecessor: config.progression.empty_predecessor,
            leaderboard_limit: config.leaderboard.limit,
        }
    }
}

pub struct App<B: LearningBackend + ?Sized> {
    backend: Arc<B>,
    settings: AppSettings,
    state: AppState,
    leaderboard: Leaderboard,
}

impl<B: LearningBackend + ?Sized> App<B> {
    pub fn new(backend: Arc<B>, settings: AppSettings) -> Self {
        let leaderboard = Leaderboard::new(settings.leaderboard_limit);
        Self { backend, settings, state: AppState::new(), leaderboard }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    pub fn view(&self) -> &View {
        self.state.view.current()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.state.take_notifications()
    }

    pub fn session_changes(&self) -> watch::Receiver<Option<AuthUser>> {
        self.backend.session_changes()
    }

    /// Unlock evaluation over the current map and progress
    pub fn evaluator(&self) -> UnlockEvaluator<'_> {
        UnlockEvaluator::new(&self.state.map, &self.state.progress).with_policy(self.settings.empty_predecessor)
    }

    /// Convert a failed action into user feedback, passing the result through
    fn report<T>(&mut self, result: AppResult<T>) -> AppResult<T> {
        if let Err(e) = &result {
            match e {
                // Failed loads show up inline in the affected region
                AppError::Fetch { .. } => debug!("Load failed: {}", e),
                AppError::Locked(_) | AppError::Validation(_) => self.state.notify(Notification::warning(e.to_string())),
                _ => self.state.notify(Notification::error(e.to_string())),
            }
        }
        result
    }

    fn require_user(&self) -> AppResult<AuthUser> {
        self.state.user.clone().ok_or_else(|| AppError::Forbidden("sign in first".into()))
    }

    fn require_admin(&self) -> AppResult<AuthUser> {
        let user = self.require_user()?;
        if !self.state.is_admin() {
            return Err(AppError::Forbidden("administrator role required".into()));
        }
        Ok(user)
    }

    fn navigate(&mut self, event: Navigation) -> AppResult<()> {
        self.state.view.apply(event)?;
        Ok(())
    }

    // ---- session ----

    pub async fn register(&mut self, email: &str, password: &str, full_name: &str) -> AppResult<AuthUser> {
        let result = self.register_inner(email, password, full_name).await;
        self.report(result)
    }

    async fn register_inner(&mut self, email: &str, password: &str, full_name: &str) -> AppResult<AuthUser> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("Enter a valid email address".into()));
        }
        if password.len() < 6 {
            return Err(AppError::Validation("Password must be at least 6 characters".into()));
        }

        let user = self.backend.sign_up(email, password, full_name).await.map_err(AppError::Auth)?;
        if matches!(self.view(), View::Auth { mode: crate::types::AuthMode::Register }) {
            self.navigate(Navigation::ToggleAuthMode)?;
        }
        self.state.notify(Notification::success("Registration complete, please log in"));
        Ok(user)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> AppResult<Session> {
        let result = self.login_inner(email, password).await;
        self.report(result)
    }

    async fn login_inner(&mut self, email: &str, password: &str) -> AppResult<Session> {
        if let (Some(user), Some(session)) = (&self.state.user, self.backend.current_session()) {
            if user.email.eq_ignore_ascii_case(email.trim()) {
                debug!("{} is already signed in", user.email);
                return Ok(session);
            }
        }

        let session = self.backend.sign_in(email.trim(), password).await.map_err(AppError::Auth)?;
        self.on_signed_in(session.user.clone()).await?;
        Ok(session)
    }

    /// Continue a stored session
    pub async fn resume(&mut self, session: &Session) -> AppResult<AuthUser> {
        let result = self.resume_inner(session).await;
        self.report(result)
    }

    async fn resume_inner(&mut self, session: &Session) -> AppResult<AuthUser> {
        let user = self.backend.restore_session(session).await.map_err(AppError::Auth)?;
        self.on_signed_in(user.clone()).await?;
        Ok(user)
    }

    async fn on_signed_in(&mut self, user: AuthUser) -> AppResult<()> {
        if self.state.user.as_ref().is_some_and(|u| u.id == user.id) {
            return Ok(());
        }

        info!("Session started for {}", user.email);
        self.state.clear_session();
        self.state.user = Some(user.clone());

        let (record, score) = tokio::join!(self.backend.get_profile(&user.id), self.backend.get_score_info(&user.id));
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                // A session without a profile is unusable
                warn!("Profile load failed for {}, signing out: {}", user.email, e);
                self.state.clear_session();
                if let Err(sign_out) = self.backend.sign_out().await {
                    warn!("Sign out after failed profile load failed: {}", sign_out);
                }
                return Err(AppError::Auth(e));
            }
        };
        let score = score.unwrap_or_else(|e| {
            warn!("Score info unavailable: {}", e);
            None
        });
        let profile = Profile::merge(record, score);
        let needs_faction = profile.faction.is_none();
        self.state.profile = Some(profile);

        let event = Navigation::SignedIn { needs_faction };
        if self.state.view.can_apply(&event) {
            self.navigate(event)?;
        }

        if needs_faction {
            self.state.notify(Notification::info("Choose a faction to begin"));
            return Ok(());
        }

        let loaded = self.load_main_data().await;
        self.leaderboard.refresh(self.backend.as_ref()).await;
        loaded
    }

    pub async fn select_faction(&mut self, faction_id: &str) -> AppResult<()> {
        let result = self.select_faction_inner(faction_id).await;
        self.report(result)
    }

    async fn select_faction_inner(&mut self, faction_id: &str) -> AppResult<()> {
        let user = self.require_user()?;
        let faction =
            find_faction(faction_id).ok_or_else(|| AppError::Validation(format!("Unknown faction '{}'", faction_id)))?;

        let record = self
            .backend
            .update_faction(&user.id, faction.id)
            .await
            .map_err(|e| AppError::mutation("faction", e))?;
        if let Some(profile) = self.state.profile.as_mut() {
            profile.faction = record.faction;
        }
        self.state.notify(Notification::success(format!("Joined {}", faction.name)));

        if matches!(self.view(), View::FactionSelection) {
            self.navigate(Navigation::FactionChosen)?;
            let loaded = self.load_main_data().await;
            self.leaderboard.refresh(self.backend.as_ref()).await;
            return loaded;
        }
        Ok(())
    }

    /// Load progress and the curriculum together, then the optional extras
    pub async fn load_main_data(&mut self) -> AppResult<()> {
        let user = self.require_user()?;

        let loaded = tokio::try_join!(self.backend.fetch_progress(&user.id), self.backend.fetch_learning_tree());
        let (snapshot, tree) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                self.state.course_error = Some(format!("Could not load courses: {}", e));
                return Err(AppError::fetch("learning data", e));
            }
        };
        self.state.progress = ProgressState::from_snapshot(snapshot);
        self.state.map.replace_tree(tree);
        self.state.course_error = None;
        info!(
            "Loaded {} blocks, {} completed",
            self.state.map.total_blocks(),
            self.state.progress.completed_count()
        );

        let (challenges, earned) =
            tokio::join!(self.backend.fetch_active_challenges(), self.backend.fetch_achievements(&user.id));
        self.state.active_challenges = match challenges {
            Ok(list) => Loadable::Ready(list),
            Err(e) => Loadable::Failed(e.to_string()),
        };
        match earned {
            Ok(list) => {
                self.state.earned = list
                    .iter()
                    .filter_map(|a| AchievementCode::all().iter().copied().find(|c| c.as_str() == a.code))
                    .collect();
                self.state.achievements = Loadable::Ready(list);
            }
            Err(e) => self.state.achievements = Loadable::Failed(e.to_string()),
        }
        Ok(())
    }

    pub async fn logout(&mut self) {
        if let Err(e) = self.backend.sign_out().await {
            warn!("Sign out failed: {}", e);
        }
        self.state.clear_session();
        self.leaderboard.clear().await;
        self.state.view.reset();
        self.state.notify(Notification::info("Signed out"));
    }

    pub async fn restart(&mut self) -> AppResult<()> {
        let result = self.restart_inner().await;
        self.report(result)
    }

    async fn restart_inner(&mut self) -> AppResult<()> {
        let user = self.require_user()?;
        self.backend.reset_progress(&user.id).await.map_err(|e| AppError::mutation("progress reset", e))?;

        // The server copy is gone; never show the old one even if the refetch fails
        self.state.progress.clear();
        self.state.last_viewed_block = None;
        if matches!(self.view(), View::Main(_)) {
            self.navigate(Navigation::BackToCategories)?;
        }
        self.state.notify(Notification::success("Progress reset, your journey starts over"));

        let snapshot = self
            .backend
            .fetch_progress(&user.id)
            .await
            .map_err(|e| AppError::fetch("progress", e))?;
        self.state.progress = ProgressState::from_snapshot(snapshot);
        Ok(())
    }

    // ---- course navigation ----

    pub fn select_category(&mut self, category_id: &str) -> AppResult<()> {
        let result = self.select_category_inner(category_id);
        self.report(result)
    }

    fn select_category_inner(&mut self, category_id: &str) -> AppResult<()> {
        self.require_user()?;
        if self.state.map.category(category_id).is_none() {
            return Err(AppError::NotFound(format!("category {}", category_id)));
        }
        if !self.evaluator().is_category_unlocked(category_id) {
            return Err(AppError::Locked("finish the previous category first".into()));
        }
        self.navigate(Navigation::SelectCategory(category_id.to_string()))
    }

    pub fn select_chapter(&mut self, chapter_id: &str) -> AppResult<()> {
        let result = self.select_chapter_inner(chapter_id);
        self.report(result)
    }

    fn select_chapter_inner(&mut self, chapter_id: &str) -> AppResult<()> {
        self.require_user()?;
        let category_id = self
            .state
            .map
            .chapter(chapter_id)
            .map(|(category, _)| category.id.clone())
            .ok_or_else(|| AppError::NotFound(format!("chapter {}", chapter_id)))?;

        let evaluator = self.evaluator();
        if !evaluator.is_category_unlocked(&category_id) {
            return Err(AppError::Locked("finish the previous category first".into()));
        }
        let block = evaluator.entry_block_for_chapter(chapter_id).map(|e| e.id().to_string());

        self.navigate(Navigation::SelectChapter {
            category: category_id,
            chapter: chapter_id.to_string(),
            block: block.clone(),
        })?;
        if block.is_some() {
            self.state.last_viewed_block = block;
        }
        Ok(())
    }

    /// Seed the resume point from an earlier run; unknown blocks are ignored
    pub fn restore_last_viewed(&mut self, block_id: Option<BlockId>) {
        if !self.state.is_signed_in() {
            return;
        }
        match block_id {
            Some(id) if self.state.map.entry(&id).is_some() => self.state.last_viewed_block = Some(id),
            Some(id) => debug!("Dropping stale resume point {}", id),
            None => {}
        }
    }

    pub fn select_block(&mut self, block_id: &str) -> AppResult<()> {
        let result = self.select_block_inner(block_id);
        self.report(result)
    }

    fn select_block_inner(&mut self, block_id: &str) -> AppResult<()> {
        self.require_user()?;
        let (category, chapter) = self
            .state
            .map
            .entry(block_id)
            .map(|e| (e.category_id.clone(), e.chapter_id.clone()))
            .ok_or_else(|| AppError::NotFound(format!("block {}", block_id)))?;

        if !self.evaluator().is_block_unlocked(block_id) {
            return Err(AppError::Locked("finish the previous block first".into()));
        }

        let same_chapter = matches!(
            self.view(),
            View::Main(CourseView::ChapterDetail { chapter: current, .. }) if *current == chapter
        );
        let event = if same_chapter {
            Navigation::SelectBlock(block_id.to_string())
        } else {
            Navigation::SelectChapter { category, chapter, block: Some(block_id.to_string()) }
        };
        self.navigate(event)?;
        self.state.last_viewed_block = Some(block_id.to_string());
        Ok(())
    }

    pub fn back(&mut self) -> AppResult<()> {
        let event = match self.view() {
            View::Main(CourseView::ChapterDetail { .. }) => Navigation::BackToChapters,
            View::Main(CourseView::ChapterSelection { .. }) => Navigation::BackToCategories,
            View::Viewer { .. } => Navigation::CloseViewer,
            View::Profile => Navigation::BackToMain,
            View::Admin(AdminView::Categories) => Navigation::BackToMain,
            View::Admin(current) => Navigation::AdminDrill(admin::drill_up(current)),
            View::Auth { .. } => Navigation::BackToLanding,
            _ => return Ok(()),
        };
        let result = self.navigate(event);
        self.report(result)
    }

    /// Open the selected block's video or document in the viewer
    pub fn open_media(&mut self, kind: MediaKind) -> AppResult<()> {
        let result = self.open_media_inner(kind);
        self.report(result)
    }

    fn open_media_inner(&mut self, kind: MediaKind) -> AppResult<()> {
        let block_id = match self.view() {
            View::Main(CourseView::ChapterDetail { block: Some(block), .. }) => block.clone(),
            _ => return Err(AppError::Validation("open a block first".into())),
        };
        let entry = self
            .state
            .map
            .entry(&block_id)
            .ok_or_else(|| AppError::NotFound(format!("block {}", block_id)))?;
        let url = match kind {
            MediaKind::Video => entry.block.video_url.clone(),
            MediaKind::Document => entry.block.document_url.clone(),
        }
        .ok_or_else(|| AppError::Validation("this block has no such media".into()))?;

        self.navigate(Navigation::OpenViewer(MediaRef { kind, url, block_id }))
    }

    // ---- completion ----

    pub async fn complete_block(&mut self, block_id: &str) -> AppResult<Option<CompletionReport>> {
        let result = self.complete_block_inner(block_id).await;
        self.report(result)
    }

    async fn complete_block_inner(&mut self, block_id: &str) -> AppResult<Option<CompletionReport>> {
        let user = self.require_user()?;

        let plan = match plan_completion(
            &self.state.map,
            &self.state.progress,
            block_id,
            self.settings.default_block_points,
        ) {
            CompletionDecision::Apply(plan) => plan,
            CompletionDecision::AlreadyCompleted => {
                debug!("Block {} already completed", block_id);
                return Ok(None);
            }
            CompletionDecision::Locked => return Err(AppError::Locked("finish the previous block first".into())),
            CompletionDecision::NotFound => return Err(AppError::NotFound(format!("block {}", block_id))),
        };

        let report = execute_completion(self.backend.as_ref(), &user.id, &mut self.state.progress, plan).await?;

        match report.points_awarded {
            Some(points) => {
                if let Some(profile) = self.state.profile.as_mut() {
                    profile.points += i64::from(points);
                }
                self.state.notify(Notification::success(format!("Block completed, +{} points", points)));
            }
            None => self.state.notify(Notification::success("Block completed")),
        }

        self.grant_achievements(&user.id, &report).await;
        self.advance_after(&report.block_id)?;

        if report.points_awarded.is_some() {
            self.leaderboard.refresh(self.backend.as_ref()).await;
        }
        Ok(Some(report))
    }

    async fn grant_achievements(&mut self, user_id: &str, report: &CompletionReport) {
        let earned = achievements::earned_by(report, &self.state.map, &self.state.progress);
        for code in earned {
            if self.state.earned.contains(&code) {
                continue;
            }
            match self.backend.award_achievement(user_id, code).await {
                Ok(()) => {
                    self.state.earned.insert(code);
                    self.state.notify(Notification::success(format!("Achievement unlocked: {}", code.title())));
                }
                Err(e) => warn!("Could not award {}: {}", code, e),
            }
        }
    }

    /// Move the chapter view to the next block of the same chapter, if any
    fn advance_after(&mut self, block_id: &str) -> AppResult<()> {
        let showing = matches!(
            self.view(),
            View::Main(CourseView::ChapterDetail { block: Some(current), .. }) if current == block_id
        );
        if !showing {
            return Ok(());
        }

        let next = self.state.map.position(block_id).and_then(|pos| {
            let current = &self.state.map.flat()[pos];
            self.state
                .map
                .flat()
                .get(pos + 1)
                .filter(|next| next.chapter_id == current.chapter_id)
                .map(|next| next.id().to_string())
        });
        if let Some(next) = next {
            self.navigate(Navigation::SelectBlock(next.clone()))?;
            self.state.last_viewed_block = Some(next);
        } else {
            self.state.notify(Notification::success("Chapter finished"));
        }
        Ok(())
    }

    pub async fn answer_quiz(&mut self, block_id: &str, choice: usize) -> AppResult<QuizVerdict> {
        let result = self.answer_quiz_inner(block_id, choice).await;
        self.report(result)
    }

    async fn answer_quiz_inner(&mut self, block_id: &str, choice: usize) -> AppResult<QuizVerdict> {
        self.require_user()?;
        let verdict = {
            let entry = self
                .state
                .map
                .entry(block_id)
                .ok_or_else(|| AppError::NotFound(format!("block {}", block_id)))?;
            let quiz = entry
                .block
                .quiz()
                .ok_or_else(|| AppError::Validation("this block has no quiz".into()))?;
            if !self.evaluator().is_block_unlocked(block_id) {
                return Err(AppError::Locked("finish the previous block first".into()));
            }
            quiz.check(choice)
        };

        match verdict {
            QuizVerdict::InvalidOption => {
                Err(AppError::Validation(format!("option {} does not exist", Quiz::option_label(choice))))
            }
            QuizVerdict::Incorrect => {
                self.state.notify(Notification::warning("Not quite, try again"));
                Ok(QuizVerdict::Incorrect)
            }
            QuizVerdict::Correct => {
                self.complete_block_inner(block_id).await?;
                Ok(QuizVerdict::Correct)
            }
        }
    }

    /// Jump to where the learner left off
    pub async fn continue_learning(&mut self) -> AppResult<Option<BlockId>> {
        let result = self.continue_learning_inner();
        self.report(result)
    }

    fn continue_learning_inner(&mut self) -> AppResult<Option<BlockId>> {
        self.require_user()?;
        let target = {
            let evaluator = self.evaluator();
            let resumable = self.state.last_viewed_block.as_deref().filter(|id| {
                self.state.map.entry(id).is_some()
                    && !self.state.progress.is_completed(id)
                    && evaluator.is_block_unlocked(id)
            });
            resumable
                .map(str::to_string)
                .or_else(|| evaluator.first_incomplete().map(|e| e.id().to_string()))
        };

        match target {
            Some(block_id) => {
                self.select_block_inner(&block_id)?;
                Ok(Some(block_id))
            }
            None => {
                self.state.notify(Notification::info("Every block is complete, see your profile for your record"));
                if self.state.view.can_apply(&Navigation::OpenProfile) {
                    self.navigate(Navigation::OpenProfile)?;
                }
                Ok(None)
            }
        }
    }

    // ---- profile ----

    pub async fn open_profile(&mut self) -> AppResult<()> {
        let result = self.open_profile_inner().await;
        self.report(result)
    }

    async fn open_profile_inner(&mut self) -> AppResult<()> {
        let user = self.require_user()?;
        if !matches!(self.view(), View::Profile) {
            self.navigate(Navigation::OpenProfile)?;
        }

        self.state.achievements = Loadable::Loading;
        let (record, score, achievements) = tokio::join!(
            self.backend.get_profile(&user.id),
            self.backend.get_score_info(&user.id),
            self.backend.fetch_achievements(&user.id),
        );
        match (record, score) {
            (Ok(record), Ok(score)) => self.state.profile = Some(Profile::merge(record, score)),
            (Err(e), _) | (_, Err(e)) => warn!("Profile refresh failed: {}", e),
        }
        self.state.achievements = match achievements {
            Ok(list) => Loadable::Ready(list),
            Err(e) => Loadable::Failed(e.to_string()),
        };
        Ok(())
    }

    /// Set the display name; it can only be chosen once
    pub async fn set_username(&mut self, name: &str) -> AppResult<()> {
        let result = self.set_username_inner(name).await;
        self.report(result)
    }

    async fn set_username_inner(&mut self, name: &str) -> AppResult<()> {
        let user = self.require_user()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Name cannot be empty".into()));
        }
        if name.chars().count() > 32 {
            return Err(AppError::Validation("Name is limited to 32 characters".into()));
        }
        if self.state.profile.as_ref().is_some_and(|p| p.username.is_some()) {
            return Err(AppError::Validation("Display name is already set".into()));
        }

        let info = self
            .backend
            .update_username(&user.id, name)
            .await
            .map_err(|e| AppError::mutation("display name", e))?;
        if let Some(profile) = self.state.profile.as_mut() {
            profile.username = info.full_name.or_else(|| Some(name.to_string()));
        }
        self.state.notify(Notification::success("Name updated"));
        Ok(())
    }

    // ---- leaderboards ----

    /// Public boards for the landing page; needs no session
    pub async fn load_landing(&mut self) {
        self.state.active_challenges = Loadable::Loading;
        let (challenges, _) = tokio::join!(
            self.backend.fetch_active_challenges(),
            self.leaderboard.refresh(self.backend.as_ref())
        );
        self.state.active_challenges = match challenges {
            Ok(list) => Loadable::Ready(list),
            Err(e) => {
                debug!("Challenges unavailable on landing: {}", e);
                Loadable::Failed(e.to_string())
            }
        };
    }

    pub async fn refresh_leaderboards(&self) -> bool {
        self.leaderboard.refresh(self.backend.as_ref()).await
    }

    // ---- admin ----

    pub fn open_admin(&mut self) -> AppResult<()> {
        let result = self.require_admin().and_then(|_| self.navigate(Navigation::OpenAdmin));
        self.report(result)
    }

    pub fn admin_navigate(&mut self, target: AdminView) -> AppResult<()> {
        let result = self.admin_navigate_inner(target);
        self.report(result)
    }

    fn admin_navigate_inner(&mut self, target: AdminView) -> AppResult<()> {
        self.require_admin()?;
        if admin::list_items(&self.state.map, &target).is_none() {
            return Err(AppError::NotFound("that content no longer exists".into()));
        }
        self.navigate(Navigation::AdminDrill(target))
    }

    async fn reload_tree(&mut self) -> AppResult<()> {
        match self.backend.fetch_learning_tree().await {
            Ok(tree) => {
                self.state.map.replace_tree(tree);
                self.state.course_error = None;
                Ok(())
            }
            Err(e) => {
                self.state.course_error = Some(format!("Could not reload courses: {}", e));
                Err(AppError::fetch("learning tree", e))
            }
        }
    }

    pub async fn save_category(&mut self, form: &CategoryForm) -> AppResult<()> {
        let result = self.save_category_inner(form).await;
        self.report(result)
    }

    async fn save_category_inner(&mut self, form: &CategoryForm) -> AppResult<()> {
        self.require_admin()?;
        let draft = admin::validate_category(form)?;
        self.backend.upsert_category(&draft).await.map_err(|e| AppError::mutation("category", e))?;
        self.state.notify(Notification::success("Saved"));
        self.reload_tree().await
    }

    pub async fn save_chapter(&mut self, form: &ChapterForm) -> AppResult<()> {
        let result = self.save_chapter_inner(form).await;
        self.report(result)
    }

    async fn save_chapter_inner(&mut self, form: &ChapterForm) -> AppResult<()> {
        self.require_admin()?;
        let draft = admin::validate_chapter(form)?;
        self.backend.upsert_chapter(&draft).await.map_err(|e| AppError::mutation("chapter", e))?;
        self.state.notify(Notification::success("Saved"));
        self.reload_tree().await
    }

    pub async fn save_section(&mut self, form: &SectionForm) -> AppResult<()> {
        let result = self.save_section_inner(form).await;
        self.report(result)
    }

    async fn save_section_inner(&mut self, form: &SectionForm) -> AppResult<()> {
        self.require_admin()?;
        let draft = admin::validate_section(form)?;
        self.backend.upsert_section(&draft).await.map_err(|e| AppError::mutation("section", e))?;
        self.state.notify(Notification::success("Saved"));
        self.reload_tree().await
    }

    pub async fn save_block(&mut self, form: &BlockForm) -> AppResult<()> {
        let result = self.save_block_inner(form).await;
        self.report(result)
    }

    async fn save_block_inner(&mut self, form: &BlockForm) -> AppResult<()> {
        self.require_admin()?;
        let draft = admin::validate_block(form)?;
        self.backend.upsert_block(&draft).await.map_err(|e| AppError::mutation("block", e))?;
        self.state.notify(Notification::success("Saved"));
        self.reload_tree().await
    }

    pub async fn delete_content(&mut self, kind: ContentKind, id: &str) -> AppResult<()> {
        let result = self.delete_content_inner(kind, id).await;
        self.report(result)
    }

    async fn delete_content_inner(&mut self, kind: ContentKind, id: &str) -> AppResult<()> {
        self.require_admin()?;
        self.backend.delete_content(kind, id).await.map_err(|e| AppError::mutation("deletion", e))?;
        self.state.notify(Notification::success(format!("Deleted {} {}", kind, id)));

        if kind == ContentKind::Challenge {
            self.load_challenges_inner().await
        } else {
            self.reload_tree().await
        }
    }

    pub async fn load_challenges(&mut self) -> AppResult<()> {
        let result = self.load_challenges_inner().await;
        self.report(result)
    }

    async fn load_challenges_inner(&mut self) -> AppResult<()> {
        self.require_admin()?;
        self.state.admin_challenges = Loadable::Loading;
        match self.backend.fetch_challenges().await {
            Ok(list) => {
                self.state.admin_challenges = Loadable::Ready(list);
                Ok(())
            }
            Err(e) => {
                self.state.admin_challenges = Loadable::Failed(e.to_string());
                Err(AppError::fetch("challenges", e))
            }
        }
    }

    pub async fn save_challenge(&mut self, form: &ChallengeForm) -> AppResult<()> {
        let result = self.save_challenge_inner(form).await;
        self.report(result)
    }

    async fn save_challenge_inner(&mut self, form: &ChallengeForm) -> AppResult<()> {
        self.require_admin()?;
        let draft = admin::validate_challenge(form)?;
        if let Some(target) = &draft.target_category_id {
            if self.state.map.category(target).is_none() {
                return Err(AppError::Validation(format!("Unknown target category '{}'", target)));
            }
        }
        self.backend.upsert_challenge(&draft).await.map_err(|e| AppError::mutation("challenge", e))?;
        self.state.notify(Notification::success("Saved"));
        self.load_challenges_inner().await
    }

    /// Settle a challenge and hand out its reward
    pub async fn finish_challenge(&mut self, challenge_id: &str) -> AppResult<()> {
        let result = self.finish_challenge_inner(challenge_id).await;
        self.report(result)
    }

    async fn finish_challenge_inner(&mut self, challenge_id: &str) -> AppResult<()> {
        self.require_admin()?;
        self.backend
            .finish_challenge(challenge_id)
            .await
            .map_err(|e| AppError::mutation("challenge settlement", e))?;
        self.state.notify(Notification::success("Challenge settled, rewards distributed"));
        self.leaderboard.refresh(self.backend.as_ref()).await;
        self.load_challenges_inner().await
    }
}

impl<B: LearningBackend + ?Sized + 'static> App<B> {
    /// Keep the leaderboards current from the backend's score events
    pub fn start_live_updates(&self) -> JoinHandle<()> {
        self.leaderboard.spawn_listener(Arc::clone(&self.backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockLearningBackend, ProfileRecord, ScoreInfo};
    use crate::error::BackendError;
    use crate::learning::{Block, Category, Chapter, ProgressSnapshot, Section};
    use crate::types::UserRole;

    fn tree() -> Vec<Category> {
        let block = |id: &str| Block { id: id.into(), title: id.to_uppercase(), ..Default::default() };
        vec![Category {
            id: "c1".into(),
            title: "Basics".into(),
            chapters: vec![Chapter {
                id: "ch1".into(),
                title: "Start".into(),
                sections: vec![Section {
                    id: "s1".into(),
                    title: "One".into(),
                    order: 1,
                    blocks: vec![block("b1"), block("b2")],
                }],
                ..Default::default()
            }],
            ..Default::default()
        }]
    }

    fn signed_in_backend(faction: Option<&'static str>) -> MockLearningBackend {
        backend_with_tree(faction, tree())
    }

    fn backend_with_tree(faction: Option<&'static str>, curriculum: Vec<Category>) -> MockLearningBackend {
        let mut backend = MockLearningBackend::new();
        backend.expect_current_session().returning(|| None);
        backend.expect_sign_in().returning(|email, _| {
            Ok(Session::local(AuthUser { id: "u1".into(), email: email.to_string() }))
        });
        backend.expect_get_profile().returning(move |_| {
            Ok(ProfileRecord { role: UserRole::User, faction: faction.map(str::to_string) })
        });
        backend
            .expect_get_score_info()
            .returning(|_| Ok(Some(ScoreInfo { username: Some("u1@corp.com".into()), full_name: None, points: 0 })));
        backend.expect_fetch_progress().returning(|_| Ok(ProgressSnapshot::default()));
        backend.expect_fetch_learning_tree().returning(move || Ok(curriculum.clone()));
        backend.expect_fetch_active_challenges().returning(|| Ok(vec![]));
        backend.expect_fetch_achievements().returning(|_| Ok(vec![]));
        backend.expect_fetch_leaderboard().returning(|_| Ok(vec![]));
        backend.expect_fetch_faction_leaderboard().returning(|| Ok(vec![]));
        backend
    }

    fn quiet_course_calls(backend: &mut MockLearningBackend) {
        backend.expect_current_session().returning(|| None);
        backend.expect_get_score_info().returning(|_| Ok(None));
        backend.expect_fetch_learning_tree().returning(|| Ok(tree()));
        backend.expect_fetch_active_challenges().returning(|| Ok(vec![]));
        backend.expect_fetch_achievements().returning(|_| Ok(vec![]));
        backend.expect_fetch_leaderboard().returning(|_| Ok(vec![]));
        backend.expect_fetch_faction_leaderboard().returning(|| Ok(vec![]));
    }

    #[tokio::test]
    async fn test_failed_profile_load_signs_out_so_retry_loads() {
        let mut backend = MockLearningBackend::new();
        let mut seq = mockall::Sequence::new();
        quiet_course_calls(&mut backend);
        backend.expect_sign_in().times(2).returning(|email, _| {
            Ok(Session::local(AuthUser { id: "u1".into(), email: email.to_string() }))
        });
        backend
            .expect_get_profile()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BackendError::Network("timed out".into())));
        backend.expect_sign_out().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        backend
            .expect_get_profile()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ProfileRecord { role: UserRole::User, faction: Some("it_dept".into()) }));
        backend.expect_fetch_progress().returning(|_| Ok(ProgressSnapshot::default()));

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        assert!(matches!(app.login("u1@corp.com", "secret1").await, Err(AppError::Auth(_))));
        assert!(app.state().user.is_none());
        assert_eq!(app.view(), &View::Landing);
        assert_eq!(app.take_notifications()[0].level, crate::types::NoticeLevel::Error);

        app.login("u1@corp.com", "secret1").await.unwrap();
        assert!(app.state().profile.is_some());
        assert_eq!(app.view(), &View::Main(CourseView::CategorySelection));
        assert_eq!(app.state().map.total_blocks(), 2);
    }

    #[tokio::test]
    async fn test_restart_clears_progress_even_when_refetch_fails() {
        let mut backend = MockLearningBackend::new();
        let mut seq = mockall::Sequence::new();
        quiet_course_calls(&mut backend);
        backend.expect_sign_in().returning(|email, _| {
            Ok(Session::local(AuthUser { id: "u1".into(), email: email.to_string() }))
        });
        backend
            .expect_get_profile()
            .returning(|_| Ok(ProfileRecord { role: UserRole::User, faction: Some("it_dept".into()) }));
        backend
            .expect_fetch_progress()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(ProgressSnapshot { completed: vec!["b1".into()], awarded: vec!["b1".into()] }));
        backend.expect_reset_progress().times(1).in_sequence(&mut seq).returning(|_| Ok(()));
        backend
            .expect_fetch_progress()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BackendError::Network("offline".into())));

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        assert!(app.state().progress.is_completed("b1"));

        assert!(app.restart().await.is_err());
        assert_eq!(app.state().progress.completed_count(), 0);
        assert!(app.evaluator().is_block_unlocked("b1"));
        assert!(!app.evaluator().is_block_unlocked("b2"));
    }

    #[tokio::test]
    async fn test_login_without_faction_requires_selection() {
        let mut backend = signed_in_backend(None);
        backend
            .expect_update_faction()
            .withf(|_, faction| faction == "it_dept")
            .returning(|_, f| Ok(ProfileRecord { role: UserRole::User, faction: Some(f.to_string()) }));

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        assert_eq!(app.view(), &View::FactionSelection);
        assert!(app.state().map.is_empty());

        assert!(app.select_faction("sales").await.is_err());
        app.select_faction("it_dept").await.unwrap();
        assert_eq!(app.view(), &View::Main(CourseView::CategorySelection));
        assert_eq!(app.state().map.total_blocks(), 2);
    }

    #[tokio::test]
    async fn test_locked_block_is_rejected_with_warning() {
        let backend = signed_in_backend(Some("it_dept"));
        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        app.take_notifications();

        let err = app.select_block("b2").unwrap_err();
        assert!(matches!(err, AppError::Locked(_)));
        let notes = app.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, crate::types::NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_complete_advances_and_awards() {
        let mut backend = signed_in_backend(Some("it_dept"));
        backend.expect_save_progress().returning(|_, _| Ok(()));
        backend.expect_award_points().withf(|_, pts| *pts == 10).times(1).returning(|_, _| Ok(()));
        backend.expect_award_achievement().returning(|_, _| Ok(()));

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        app.select_chapter("ch1").unwrap();

        let report = app.complete_block("b1").await.unwrap().unwrap();
        assert_eq!(report.points_awarded, Some(10));
        assert_eq!(app.state().profile.as_ref().unwrap().points, 10);
        assert!(app.state().earned.contains(&AchievementCode::CompleteFirstBlock));
        assert_eq!(
            app.view(),
            &View::Main(CourseView::ChapterDetail {
                category: "c1".into(),
                chapter: "ch1".into(),
                block: Some("b2".into())
            })
        );

        // Completing again is a no-op
        assert!(app.complete_block("b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back_and_notifies() {
        let mut backend = signed_in_backend(Some("it_dept"));
        backend.expect_save_progress().returning(|_, _| Err(BackendError::Network("offline".into())));
        backend.expect_award_points().never();

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        app.take_notifications();

        assert!(app.complete_block("b1").await.is_err());
        assert!(!app.state().progress.is_completed("b1"));
        let notes = app.take_notifications();
        assert_eq!(notes[0].level, crate::types::NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_wrong_quiz_answer_changes_nothing() {
        let mut curriculum = tree();
        let block = &mut curriculum[0].chapters[0].sections[0].blocks[0];
        block.quiz_question = Some("2 + 2?".into());
        block.quiz_options = Some(vec!["3".into(), "4".into()]);
        block.correct_answer_index = Some(1);
        let mut backend = backend_with_tree(Some("it_dept"), curriculum);
        backend.expect_save_progress().never();

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();

        assert_eq!(app.answer_quiz("b1", 0).await.unwrap(), QuizVerdict::Incorrect);
        assert!(matches!(app.answer_quiz("b1", 5).await, Err(AppError::Validation(_))));
        assert_eq!(app.state().progress.completed_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_actions_require_role() {
        let backend = signed_in_backend(Some("it_dept"));
        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();

        assert!(matches!(app.open_admin(), Err(AppError::Forbidden(_))));
        let form = CategoryForm { title: "New".into(), ..Default::default() };
        assert!(matches!(app.save_category(&form).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let mut backend = signed_in_backend(Some("it_dept"));
        backend.expect_sign_out().returning(|| Ok(()));

        let mut app = App::new(Arc::new(backend), AppSettings::default());
        app.login("u1@corp.com", "secret1").await.unwrap();
        app.logout().await;

        assert_eq!(app.view(), &View::Landing);
        assert!(app.state().user.is_none());
        assert!(app.state().map.is_empty());
        assert!(app.leaderboard().snapshot().await.personal.ready().is_none());
    }
}
