//! End-to-end learner and admin flows over the embedded backend

use std::sync::Arc;

use questline::app::admin::{ChallengeForm, ChapterForm};
use questline::app::view::{CourseView, View};
use questline::backend::{BlockDraft, ContentKind, LearningBackend, LocalBackend};
use questline::bookmark::Bookmarks;
use questline::learning::quiz::QuizVerdict;
use questline::learning::{Block, Category, Chapter, Section};
use questline::types::{Loadable, NoticeLevel, UserRole};
use questline::{App, AppSettings};

fn course() -> Vec<Category> {
    let text = |id: &str, order: i64| Block {
        id: id.into(),
        title: format!("Lesson {}", id),
        order,
        content_markdown: Some("Read me".into()),
        ..Default::default()
    };
    let quiz = Block {
        id: "b2".into(),
        title: "Check".into(),
        order: 2,
        quiz_question: Some("Which port is HTTPS?".into()),
        quiz_options: Some(vec!["80".into(), "443".into(), "22".into()]),
        correct_answer_index: Some(1),
        points: Some(20),
        ..Default::default()
    };

    vec![
        Category {
            id: "c1".into(),
            title: "Onboarding".into(),
            order: 1,
            chapters: vec![Chapter {
                id: "ch1".into(),
                title: "Welcome".into(),
                order: 1,
                sections: vec![Section { id: "s1".into(), title: "Start".into(), order: 1, blocks: vec![text("b1", 1), quiz] }],
                ..Default::default()
            }],
            ..Default::default()
        },
        Category {
            id: "c2".into(),
            title: "Security".into(),
            order: 2,
            chapters: vec![Chapter {
                id: "ch2".into(),
                title: "Passwords".into(),
                order: 1,
                sections: vec![Section { id: "s2".into(), title: "Basics".into(), order: 1, blocks: vec![text("b3", 1)] }],
                ..Default::default()
            }],
            ..Default::default()
        },
    ]
}

async fn seeded() -> anyhow::Result<Arc<LocalBackend>> {
    let backend = LocalBackend::in_memory()?;
    backend.import_tree(&course()).await?;
    Ok(Arc::new(backend))
}

async fn signed_in(backend: &Arc<LocalBackend>, email: &str) -> anyhow::Result<App<LocalBackend>> {
    let mut app = App::new(Arc::clone(backend), AppSettings::default());
    app.register(email, "secret1", "").await?;
    app.login(email, "secret1").await?;
    app.select_faction("it_dept").await?;
    app.take_notifications();
    Ok(app)
}

async fn points(backend: &LocalBackend, user_id: &str) -> i64 {
    backend.get_score_info(user_id).await.ok().flatten().map(|s| s.points).unwrap_or_default()
}

#[tokio::test]
async fn test_new_learner_picks_faction_then_sees_courses() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut app = App::new(Arc::clone(&backend), AppSettings::default());

    app.register("new@example.com", "secret1", "New Hire").await?;
    app.login("new@example.com", "secret1").await?;
    assert_eq!(app.view(), &View::FactionSelection);
    assert!(app.state().map.is_empty());

    assert!(app.select_faction("nowhere").await.is_err());
    assert_eq!(app.view(), &View::FactionSelection);

    app.select_faction("it_dept").await?;
    assert_eq!(app.view(), &View::Main(CourseView::CategorySelection));
    assert_eq!(app.state().map.total_blocks(), 3);
    assert_eq!(app.state().profile.as_ref().and_then(|p| p.faction.as_deref()), Some("it_dept"));

    let notes = app.take_notifications();
    assert!(notes.iter().any(|n| n.message.contains("IT技术部")));
    Ok(())
}

#[tokio::test]
async fn test_chain_of_completions_unlocks_next_category() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut app = signed_in(&backend, "learner@example.com").await?;
    let user_id = app.state().user.as_ref().map(|u| u.id.clone()).unwrap_or_default();

    assert!(app.select_category("c2").is_err());
    assert_eq!(app.take_notifications()[0].level, NoticeLevel::Warning);

    app.select_chapter("ch1")?;
    assert_eq!(
        app.view(),
        &View::Main(CourseView::ChapterDetail { category: "c1".into(), chapter: "ch1".into(), block: Some("b1".into()) })
    );

    // Quiz block is locked until b1 is done
    assert!(app.answer_quiz("b2", 1).await.is_err());

    let report = app.complete_block("b1").await?.expect("completed");
    assert_eq!(report.points_awarded, Some(10));
    assert_eq!(points(&backend, &user_id).await, 10);
    assert!(matches!(app.view(), View::Main(CourseView::ChapterDetail { block: Some(b), .. }) if b == "b2"));

    // Completing again is a no-op
    assert!(app.complete_block("b1").await?.is_none());
    assert_eq!(points(&backend, &user_id).await, 10);

    assert_eq!(app.answer_quiz("b2", 0).await?, QuizVerdict::Incorrect);
    assert!(!app.state().progress.is_completed("b2"));
    assert_eq!(app.answer_quiz("b2", 1).await?, QuizVerdict::Correct);
    assert_eq!(points(&backend, &user_id).await, 30);
    assert_eq!(app.state().profile.as_ref().map(|p| p.points), Some(30));

    assert!(app.evaluator().is_category_unlocked("c2"));
    app.select_category("c2")?;

    let saved = backend.fetch_progress(&user_id).await?;
    assert_eq!(saved.completed.len(), 2);
    assert_eq!(saved.awarded.len(), 2);

    app.open_profile().await?;
    match &app.state().achievements {
        Loadable::Ready(list) => assert_eq!(list.len(), 3),
        other => panic!("achievements not loaded: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_restart_and_redo_awards_again() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut app = signed_in(&backend, "again@example.com").await?;
    let user_id = app.state().user.as_ref().map(|u| u.id.clone()).unwrap_or_default();

    app.complete_block("b1").await?;
    assert_eq!(points(&backend, &user_id).await, 10);

    app.restart().await?;
    assert_eq!(app.state().progress.completed_count(), 0);
    assert!(backend.fetch_progress(&user_id).await?.completed.is_empty());

    let report = app.complete_block("b1").await?.expect("completed");
    assert_eq!(report.points_awarded, Some(10));
    assert_eq!(points(&backend, &user_id).await, 20);
    Ok(())
}

#[tokio::test]
async fn test_continue_learning_and_progress_survives_new_session() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut app = signed_in(&backend, "resume@example.com").await?;
    app.complete_block("b1").await?;
    app.logout().await;
    assert!(!app.state().is_signed_in());
    assert_eq!(app.view(), &View::Landing);

    let mut app = App::new(Arc::clone(&backend), AppSettings::default());
    app.login("resume@example.com", "secret1").await?;
    assert_eq!(app.view(), &View::Main(CourseView::CategorySelection));
    assert!(app.state().progress.is_completed("b1"));

    assert_eq!(app.continue_learning().await?, Some("b2".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_continue_resumes_stored_place_in_next_session() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bookmarks.json");
    let backend = seeded().await?;

    let mut app = signed_in(&backend, "bookmark@example.com").await?;
    let user_id = app.state().user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
    app.complete_block("b1").await?;
    app.answer_quiz("b2", 1).await?;

    // New content ahead of finished work leaves two open blocks
    backend
        .upsert_block(&BlockDraft {
            id: Some("b0".into()),
            section_id: "s1".into(),
            title: "Prologue".into(),
            order: 0,
            video_url: None,
            document_url: None,
            content_markdown: Some("Added later".into()),
            quiz_question: None,
            quiz_options: None,
            correct_answer_index: None,
            points: None,
        })
        .await?;

    app.select_block("b3")?;
    let mut bookmarks = Bookmarks::load_from(&path)?;
    bookmarks.record(&user_id, app.state().last_viewed_block.clone());
    bookmarks.save_to(&path)?;
    app.logout().await;

    let mut app = App::new(Arc::clone(&backend), AppSettings::default());
    app.login("bookmark@example.com", "secret1").await?;
    app.restore_last_viewed(Bookmarks::load_from(&path)?.last_viewed(&user_id).cloned());
    assert_eq!(app.continue_learning().await?, Some("b3".to_string()));

    // Without a stored place the first open block wins
    let mut fresh = App::new(Arc::clone(&backend), AppSettings::default());
    fresh.login("bookmark@example.com", "secret1").await?;
    assert_eq!(fresh.continue_learning().await?, Some("b0".to_string()));

    // A place that no longer exists is ignored
    let mut stale = App::new(Arc::clone(&backend), AppSettings::default());
    stale.login("bookmark@example.com", "secret1").await?;
    stale.restore_last_viewed(Some("gone".into()));
    assert!(stale.state().last_viewed_block.is_none());
    Ok(())
}

#[tokio::test]
async fn test_guest_landing_shows_boards_and_challenges() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut learner = signed_in(&backend, "scorer@example.com").await?;
    learner.complete_block("b1").await?;

    let mut admin = App::new(Arc::clone(&backend), AppSettings::default());
    admin.register("lead@example.com", "secret1", "").await?;
    backend.set_role("lead@example.com", UserRole::Admin).await?;
    admin.login("lead@example.com", "secret1").await?;
    admin.select_faction("pmo_dept").await?;
    admin
        .save_challenge(&ChallengeForm {
            id: Some("open-week".into()),
            title: "Open week".into(),
            target_category_id: "c1".into(),
            reward_points: "50".into(),
            start_date: "2020-01-01".into(),
            end_date: "2099-01-01".into(),
            is_active: true,
            ..Default::default()
        })
        .await?;

    let mut guest = App::new(Arc::clone(&backend), AppSettings::default());
    guest.load_landing().await;
    assert_eq!(guest.view(), &View::Landing);
    assert!(!guest.state().is_signed_in());

    match &guest.state().active_challenges {
        Loadable::Ready(list) => assert_eq!(list.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["open-week"]),
        other => panic!("challenges not loaded: {:?}", other),
    }
    let panel = guest.leaderboard().snapshot().await;
    let rows = panel.personal.ready().expect("personal board");
    assert_eq!(rows[0].points, 10);
    assert!(panel.factions.ready().is_some_and(|f| f.iter().any(|s| s.faction == "it_dept")));
    assert!(guest.take_notifications().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_display_name_is_set_once() -> anyhow::Result<()> {
    let backend = seeded().await?;
    let mut app = signed_in(&backend, "named@example.com").await?;

    assert!(app.set_username(&"x".repeat(33)).await.is_err());
    app.set_username("Wang").await?;
    assert_eq!(app.state().display_name().as_deref(), Some("Wang"));
    assert!(app.set_username("Other").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_admin_edits_and_settles_challenge() -> anyhow::Result<()> {
    let backend = seeded().await?;

    let mut learner = signed_in(&backend, "finisher@example.com").await?;
    learner.complete_block("b1").await?;
    learner.answer_quiz("b2", 1).await?;
    let learner_id = learner.state().user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
    let before = points(&backend, &learner_id).await;

    let mut admin = App::new(Arc::clone(&backend), AppSettings::default());
    admin.register("boss@example.com", "secret1", "").await?;
    backend.set_role("boss@example.com", UserRole::Admin).await?;
    admin.login("boss@example.com", "secret1").await?;
    admin.select_faction("pmo_dept").await?;
    admin.open_admin()?;

    admin
        .save_chapter(&ChapterForm {
            id: None,
            category_id: "c2".into(),
            title: "Phishing".into(),
            description: String::new(),
            order: "2".into(),
        })
        .await?;
    assert_eq!(admin.state().map.category("c2").map(|c| c.chapters.len()), Some(2));

    admin
        .save_challenge(&ChallengeForm {
            id: Some("sprint".into()),
            title: "Onboarding sprint".into(),
            target_category_id: "c1".into(),
            reward_points: "100".into(),
            start_date: "2020-01-01".into(),
            end_date: "2099-01-01".into(),
            is_active: true,
            ..Default::default()
        })
        .await?;
    admin.finish_challenge("sprint").await?;
    assert_eq!(points(&backend, &learner_id).await, before + 100);

    // A finished challenge cannot pay out twice
    assert!(admin.finish_challenge("sprint").await.is_err());
    assert_eq!(points(&backend, &learner_id).await, before + 100);

    admin.delete_content(ContentKind::Category, "c2").await?;
    assert!(admin.state().map.category("c2").is_none());

    // Learners cannot reach any of this
    assert!(learner.open_admin().is_err());
    assert!(learner.finish_challenge("sprint").await.is_err());
    Ok(())
}
