//! Embedded SQLite backend
//!
//! Keeps accounts, content, progress and scores in a single database file.
//! Used for offline demos and by the integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Achievement, AuthUser, BlockDraft, CategoryDraft, Challenge, ChallengeDraft, ChapterDraft,
    ContentKind, FactionStanding, LeaderboardRow, LearningBackend, ProfileRecord, ScoreEvent,
    ScoreFeed, ScoreInfo, SectionDraft, Session,
};
use crate::error::{BackendError, BackendResult};
use crate::learning::achievements::AchievementCode;
use crate::learning::flatten::flatten;
use crate::learning::{Block, Category, Chapter, ProgressSnapshot, Section};
use crate::types::UserRole;

/// SQLite-backed [`LearningBackend`]
pub struct LocalBackend {
    conn: Arc<Mutex<Connection>>,
    session: watch::Sender<Option<AuthUser>>,
    feed: ScoreFeed,
}

impl LocalBackend {
    /// Open (or create) the database at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;

        info!("Opened local backend at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Database that lives only as long as the backend
    pub fn in_memory() -> BackendResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        let (session, _) = watch::channel(None);
        Self { conn: Arc::new(Mutex::new(conn)), session, feed: ScoreFeed::new() }
    }

    fn init_schema(conn: &Connection) -> BackendResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                salt TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'user',
                faction TEXT
            );

            CREATE TABLE IF NOT EXISTS scores (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                username TEXT,
                full_name TEXT,
                points INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS user_progress (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                progress TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS chapters (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                chapter_id TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                video_url TEXT,
                document_url TEXT,
                content_markdown TEXT,
                quiz_question TEXT,
                quiz_options TEXT,
                correct_answer_index INTEGER,
                points INTEGER
            );

            CREATE TABLE IF NOT EXISTS user_achievements (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                code TEXT NOT NULL,
                earned_at TEXT NOT NULL,
                PRIMARY KEY (user_id, code)
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                target_category_id TEXT,
                reward_points INTEGER NOT NULL DEFAULT 0,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_chapters_category ON chapters(category_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_sections_chapter ON sections(chapter_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_blocks_section ON blocks(section_id, sort_order);
            CREATE INDEX IF NOT EXISTS idx_scores_points ON scores(points DESC);
        "#,
        )?;
        Ok(())
    }

    /// Change a user's role; local databases have no other way to create admins
    pub async fn set_role(&self, email: &str, role: UserRole) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        let user_id: String = conn
            .query_row("SELECT id FROM users WHERE email = ?1", params![email], |row| row.get(0))
            .optional()?
            .ok_or_else(|| BackendError::NotFound(format!("user {}", email)))?;
        ensure_profile(&conn, &user_id)?;
        conn.execute("UPDATE profiles SET role = ?1 WHERE id = ?2", params![role.to_string(), user_id])?;
        info!("Set role of {} to {}", email, role);
        Ok(())
    }

    /// Replace all content with the given tree, keeping the ids it carries
    pub async fn import_tree(&self, categories: &[Category]) -> BackendResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM categories", [])?;

        for category in categories {
            tx.execute(
                "INSERT INTO categories (id, title, description, sort_order) VALUES (?1, ?2, ?3, ?4)",
                params![category.id, category.title, category.description, category.order],
            )?;
            for chapter in &category.chapters {
                tx.execute(
                    "INSERT INTO chapters (id, category_id, title, description, sort_order) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![chapter.id, category.id, chapter.title, chapter.description, chapter.order],
                )?;
                for section in &chapter.sections {
                    tx.execute(
                        "INSERT INTO sections (id, chapter_id, title, sort_order) VALUES (?1, ?2, ?3, ?4)",
                        params![section.id, chapter.id, section.title, section.order],
                    )?;
                    for block in &section.blocks {
                        insert_block(&tx, &section.id, block)?;
                    }
                }
            }
        }
        tx.commit()?;

        let blocks = flatten(categories).len();
        info!("Imported {} categories ({} blocks)", categories.len(), blocks);
        Ok(blocks)
    }

    async fn user_by_email(&self, email: &str) -> BackendResult<Option<(AuthUser, String, String)>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, email, salt, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        AuthUser { id: row.get(0)?, email: row.get(1)? },
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn ensure_profile(conn: &Connection, user_id: &str) -> BackendResult<()> {
    conn.execute("INSERT OR IGNORE INTO profiles (id, role) VALUES (?1, 'user')", params![user_id])?;
    Ok(())
}

fn insert_block(conn: &Connection, section_id: &str, block: &Block) -> BackendResult<()> {
    let options = block.quiz_options.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        r#"INSERT INTO blocks
           (id, section_id, title, sort_order, video_url, document_url, content_markdown,
            quiz_question, quiz_options, correct_answer_index, points)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        params![
            block.id,
            section_id,
            block.title,
            block.order,
            block.video_url,
            block.document_url,
            block.content_markdown,
            block.quiz_question,
            options,
            block.correct_answer_index.map(|i| i as i64),
            block.points,
        ],
    )?;
    Ok(())
}

fn new_id(id: &Option<String>) -> String {
    id.clone().unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn parse_time(value: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BackendError::Decode(format!("bad timestamp '{}': {}", value, e)))
}

fn load_progress(conn: &Connection, user_id: &str) -> BackendResult<ProgressSnapshot> {
    let raw: Option<String> = conn
        .query_row("SELECT progress FROM user_progress WHERE user_id = ?1", params![user_id], |row| row.get(0))
        .optional()?;
    match raw {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(ProgressSnapshot::default()),
    }
}

fn add_points(conn: &Connection, user_id: &str, amount: i64) -> BackendResult<()> {
    conn.execute(
        r#"INSERT INTO scores (user_id, points) VALUES (?1, ?2)
           ON CONFLICT(user_id) DO UPDATE SET points = points + excluded.points"#,
        params![user_id, amount],
    )?;
    Ok(())
}

type ChallengeRow = (String, String, String, Option<String>, i64, String, String, bool);

fn challenge_from_row(row: ChallengeRow) -> BackendResult<Challenge> {
    let (id, title, description, target_category_id, reward_points, start, end, is_active) = row;
    Ok(Challenge {
        id,
        title,
        description,
        target_category_id,
        reward_points,
        start_date: parse_time(&start)?,
        end_date: parse_time(&end)?,
        is_active,
    })
}

#[async_trait]
impl LearningBackend for LocalBackend {
    async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> BackendResult<AuthUser> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(BackendError::InvalidCredentials("a valid email is required".into()));
        }
        if password.len() < 6 {
            return Err(BackendError::InvalidCredentials("password must be at least 6 characters".into()));
        }
        if self.user_by_email(&email).await?.is_some() {
            return Err(BackendError::Conflict(format!("{} is already registered", email)));
        }

        let user = AuthUser { id: Uuid::new_v4().to_string(), email: email.clone() };
        let salt = Uuid::new_v4().simple().to_string();
        let full_name = Some(full_name.trim()).filter(|n| !n.is_empty());

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (id, email, salt, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.id, user.email, salt, hash_password(&salt, password), Utc::now().to_rfc3339()],
        )?;
        ensure_profile(&tx, &user.id)?;
        tx.execute(
            "INSERT INTO scores (user_id, username, full_name, points) VALUES (?1, ?2, ?3, 0)",
            params![user.id, user.email, full_name],
        )?;
        tx.commit()?;

        info!("Registered local account {}", user.email);
        self.feed.publish(ScoreEvent::Changed { user_id: Some(user.id.clone()) });
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let email = email.trim().to_lowercase();
        let (user, salt, hash) = self
            .user_by_email(&email)
            .await?
            .ok_or_else(|| BackendError::InvalidCredentials("unknown email or wrong password".into()))?;

        if hash_password(&salt, password) != hash {
            return Err(BackendError::InvalidCredentials("unknown email or wrong password".into()));
        }

        self.session.send_replace(Some(user.clone()));
        Ok(Session::local(user))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.session.send_replace(None);
        Ok(())
    }

    async fn restore_session(&self, session: &Session) -> BackendResult<AuthUser> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "SELECT id, email FROM users WHERE id = ?1",
                params![session.user.id],
                |row| Ok(AuthUser { id: row.get(0)?, email: row.get(1)? }),
            )
            .optional()?
            .ok_or(BackendError::Unauthenticated)?;
        drop(conn);

        self.session.send_replace(Some(user.clone()));
        Ok(user)
    }

    fn session_changes(&self) -> watch::Receiver<Option<AuthUser>> {
        self.session.subscribe()
    }

    fn current_session(&self) -> Option<Session> {
        self.session.borrow().clone().map(Session::local)
    }

    fn score_feed(&self) -> ScoreFeed {
        self.feed.clone()
    }

    async fn get_profile(&self, user_id: &str) -> BackendResult<ProfileRecord> {
        let conn = self.conn.lock().await;
        ensure_profile(&conn, user_id)?;
        let record = conn.query_row(
            "SELECT role, faction FROM profiles WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(ProfileRecord {
                    role: UserRole::from_backend_string(&row.get::<_, String>(0)?),
                    faction: row.get(1)?,
                })
            },
        )?;
        Ok(record)
    }

    async fn get_score_info(&self, user_id: &str) -> BackendResult<Option<ScoreInfo>> {
        let conn = self.conn.lock().await;
        let info = conn
            .query_row(
                "SELECT username, full_name, points FROM scores WHERE user_id = ?1",
                params![user_id],
                |row| Ok(ScoreInfo { username: row.get(0)?, full_name: row.get(1)?, points: row.get(2)? }),
            )
            .optional()?;
        Ok(info)
    }

    async fn update_faction(&self, user_id: &str, faction: &str) -> BackendResult<ProfileRecord> {
        {
            let conn = self.conn.lock().await;
            ensure_profile(&conn, user_id)?;
            conn.execute("UPDATE profiles SET faction = ?1 WHERE id = ?2", params![faction, user_id])?;
        }
        self.feed.publish(ScoreEvent::Changed { user_id: Some(user_id.to_string()) });
        self.get_profile(user_id).await
    }

    async fn update_username(&self, user_id: &str, username: &str) -> BackendResult<ScoreInfo> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                r#"INSERT INTO scores (user_id, full_name, points) VALUES (?1, ?2, 0)
                   ON CONFLICT(user_id) DO UPDATE SET full_name = excluded.full_name"#,
                params![user_id, username],
            )?;
        }
        self.feed.publish(ScoreEvent::Changed { user_id: Some(user_id.to_string()) });
        self.get_score_info(user_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("score row for {}", user_id)))
    }

    async fn fetch_learning_tree(&self) -> BackendResult<Vec<Category>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            r#"SELECT id, section_id, title, sort_order, video_url, document_url, content_markdown,
                      quiz_question, quiz_options, correct_answer_index, points
               FROM blocks ORDER BY sort_order, rowid"#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                Block {
                    id: row.get(0)?,
                    title: row.get(2)?,
                    order: row.get(3)?,
                    video_url: row.get(4)?,
                    document_url: row.get(5)?,
                    content_markdown: row.get(6)?,
                    quiz_question: row.get(7)?,
                    quiz_options: None,
                    correct_answer_index: row.get::<_, Option<i64>>(9)?.map(|i| i.max(0) as usize),
                    points: row.get::<_, Option<i64>>(10)?.map(|p| p.max(0) as u32),
                },
                row.get::<_, Option<String>>(8)?,
            ))
        })?;
        let mut blocks: HashMap<String, Vec<Block>> = HashMap::new();
        for row in rows {
            let (section_id, mut block, options) = row?;
            block.quiz_options = options.as_deref().map(serde_json::from_str).transpose()?;
            blocks.entry(section_id).or_default().push(block);
        }

        let mut stmt = conn.prepare("SELECT id, chapter_id, title, sort_order FROM sections ORDER BY sort_order, rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                Section { id: row.get(0)?, title: row.get(2)?, order: row.get(3)?, blocks: Vec::new() },
            ))
        })?;
        let mut sections: HashMap<String, Vec<Section>> = HashMap::new();
        for row in rows {
            let (chapter_id, mut section) = row?;
            section.blocks = blocks.remove(&section.id).unwrap_or_default();
            sections.entry(chapter_id).or_default().push(section);
        }

        let mut stmt = conn.prepare(
            "SELECT id, category_id, title, description, sort_order FROM chapters ORDER BY sort_order, rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                Chapter {
                    id: row.get(0)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    order: row.get(4)?,
                    sections: Vec::new(),
                },
            ))
        })?;
        let mut chapters: HashMap<String, Vec<Chapter>> = HashMap::new();
        for row in rows {
            let (category_id, mut chapter) = row?;
            chapter.sections = sections.remove(&chapter.id).unwrap_or_default();
            chapters.entry(category_id).or_default().push(chapter);
        }

        let mut stmt =
            conn.prepare("SELECT id, title, description, sort_order FROM categories ORDER BY sort_order, rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                order: row.get(3)?,
                chapters: Vec::new(),
            })
        })?;
        let mut categories = Vec::new();
        for row in rows {
            let mut category = row?;
            category.chapters = chapters.remove(&category.id).unwrap_or_default();
            categories.push(category);
        }

        debug!("Loaded {} categories from local backend", categories.len());
        Ok(categories)
    }

    async fn fetch_progress(&self, user_id: &str) -> BackendResult<ProgressSnapshot> {
        let conn = self.conn.lock().await;
        load_progress(&conn, user_id)
    }

    async fn save_progress(&self, user_id: &str, progress: &ProgressSnapshot) -> BackendResult<()> {
        let json = serde_json::to_string(progress)?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO user_progress (user_id, progress, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(user_id) DO UPDATE SET progress = excluded.progress, updated_at = excluded.updated_at"#,
            params![user_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn reset_progress(&self, user_id: &str) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM user_progress WHERE user_id = ?1", params![user_id])?;
        info!("Reset progress of {}", user_id);
        Ok(())
    }

    async fn award_points(&self, user_id: &str, amount: u32) -> BackendResult<()> {
        {
            let conn = self.conn.lock().await;
            add_points(&conn, user_id, i64::from(amount))?;
        }
        self.feed.publish(ScoreEvent::Changed { user_id: Some(user_id.to_string()) });
        Ok(())
    }

    async fn award_achievement(&self, user_id: &str, code: AchievementCode) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO user_achievements (user_id, code, earned_at) VALUES (?1, ?2, ?3)",
            params![user_id, code.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn fetch_achievements(&self, user_id: &str) -> BackendResult<Vec<Achievement>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT code, earned_at FROM user_achievements WHERE user_id = ?1 ORDER BY earned_at DESC")?;
        let rows = stmt.query_map(params![user_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut achievements = Vec::new();
        for row in rows {
            let (code, earned_at) = row?;
            let known = AchievementCode::all().iter().find(|c| c.as_str() == code);
            achievements.push(Achievement {
                name: known.map(|c| c.title().to_string()).unwrap_or_else(|| code.clone()),
                description: known.map(|c| c.description().to_string()).unwrap_or_default(),
                icon_url: None,
                earned_at: parse_time(&earned_at)?,
                code,
            });
        }
        Ok(achievements)
    }

    async fn fetch_leaderboard(&self, limit: usize) -> BackendResult<Vec<LeaderboardRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT user_id, COALESCE(username, ''), full_name, points
               FROM scores ORDER BY points DESC, user_id LIMIT ?1"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(LeaderboardRow { user_id: row.get(0)?, username: row.get(1)?, full_name: row.get(2)?, points: row.get(3)? })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn fetch_faction_leaderboard(&self) -> BackendResult<Vec<FactionStanding>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT p.faction, COUNT(p.id), COALESCE(SUM(s.points), 0)
               FROM profiles p LEFT JOIN scores s ON s.user_id = p.id
               WHERE p.faction IS NOT NULL
               GROUP BY p.faction"#,
        )?;
        let rows = stmt.query_map([], |row| {
            let members: i64 = row.get(1)?;
            let total: i64 = row.get(2)?;
            Ok(FactionStanding {
                faction: row.get(0)?,
                total_members: members,
                total_points: total,
                average_score: if members > 0 { total as f64 / members as f64 } else { 0.0 },
            })
        })?;
        let mut standings = rows.collect::<Result<Vec<_>, _>>()?;
        standings.sort_by(|a, b| b.total_points.cmp(&a.total_points).then_with(|| a.faction.cmp(&b.faction)));
        Ok(standings)
    }

    async fn fetch_active_challenges(&self) -> BackendResult<Vec<Challenge>> {
        let now = Utc::now();
        let all = self.fetch_challenges().await?;
        Ok(all.into_iter().filter(|c| c.is_active && c.start_date <= now && c.end_date >= now).collect())
    }

    async fn fetch_challenges(&self) -> BackendResult<Vec<Challenge>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, title, description, target_category_id, reward_points, start_date, end_date, is_active
               FROM challenges ORDER BY start_date DESC"#,
        )?;
        let rows = stmt.query_map([], |row| -> rusqlite::Result<ChallengeRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?;
        rows.map(|row| challenge_from_row(row?)).collect()
    }

    async fn upsert_challenge(&self, draft: &ChallengeDraft) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO challenges
               (id, title, description, target_category_id, reward_points, start_date, end_date, is_active)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title, description = excluded.description,
                 target_category_id = excluded.target_category_id, reward_points = excluded.reward_points,
                 start_date = excluded.start_date, end_date = excluded.end_date, is_active = excluded.is_active"#,
            params![
                new_id(&draft.id),
                draft.title,
                draft.description,
                draft.target_category_id,
                draft.reward_points,
                draft.start_date.to_rfc3339(),
                draft.end_date.to_rfc3339(),
                draft.is_active,
            ],
        )?;
        Ok(())
    }

    async fn finish_challenge(&self, challenge_id: &str) -> BackendResult<()> {
        let rewarded = {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;

            let (target, reward, active): (Option<String>, i64, bool) = tx
                .query_row(
                    "SELECT target_category_id, reward_points, is_active FROM challenges WHERE id = ?1",
                    params![challenge_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?
                .ok_or_else(|| BackendError::NotFound(format!("challenge {}", challenge_id)))?;
            if !active {
                return Err(BackendError::Conflict(format!("challenge {} is already finished", challenge_id)));
            }

            // Learners who completed every block of the target category share in the reward
            let mut rewarded = 0;
            if let Some(category_id) = target {
                let mut stmt = tx.prepare(
                    r#"SELECT b.id FROM blocks b
                       JOIN sections s ON s.id = b.section_id
                       JOIN chapters c ON c.id = s.chapter_id
                       WHERE c.category_id = ?1"#,
                )?;
                let required =
                    stmt.query_map(params![category_id], |row| row.get::<_, String>(0))?.collect::<Result<Vec<_>, _>>()?;
                drop(stmt);

                if !required.is_empty() {
                    let mut stmt = tx.prepare("SELECT user_id FROM user_progress")?;
                    let users = stmt.query_map([], |row| row.get::<_, String>(0))?.collect::<Result<Vec<_>, _>>()?;
                    drop(stmt);

                    for user_id in users {
                        let progress = load_progress(&tx, &user_id)?;
                        if required.iter().all(|id| progress.completed.contains(id)) {
                            add_points(&tx, &user_id, reward)?;
                            rewarded += 1;
                        }
                    }
                }
            }

            tx.execute("UPDATE challenges SET is_active = 0 WHERE id = ?1", params![challenge_id])?;
            tx.commit()?;
            rewarded
        };

        info!("Finished challenge {} ({} learners rewarded)", challenge_id, rewarded);
        if rewarded > 0 {
            self.feed.publish(ScoreEvent::Changed { user_id: None });
        }
        Ok(())
    }

    async fn upsert_category(&self, draft: &CategoryDraft) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO categories (id, title, description, sort_order) VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title, description = excluded.description, sort_order = excluded.sort_order"#,
            params![new_id(&draft.id), draft.title, draft.description, draft.order],
        )?;
        Ok(())
    }

    async fn upsert_chapter(&self, draft: &ChapterDraft) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO chapters (id, category_id, title, description, sort_order) VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(id) DO UPDATE SET
                 category_id = excluded.category_id, title = excluded.title,
                 description = excluded.description, sort_order = excluded.sort_order"#,
            params![new_id(&draft.id), draft.category_id, draft.title, draft.description, draft.order],
        )?;
        Ok(())
    }

    async fn upsert_section(&self, draft: &SectionDraft) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO sections (id, chapter_id, title, sort_order) VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(id) DO UPDATE SET
                 chapter_id = excluded.chapter_id, title = excluded.title, sort_order = excluded.sort_order"#,
            params![new_id(&draft.id), draft.chapter_id, draft.title, draft.order],
        )?;
        Ok(())
    }

    async fn upsert_block(&self, draft: &BlockDraft) -> BackendResult<()> {
        let block = Block {
            id: new_id(&draft.id),
            title: draft.title.clone(),
            order: draft.order,
            video_url: draft.video_url.clone(),
            document_url: draft.document_url.clone(),
            content_markdown: draft.content_markdown.clone(),
            quiz_question: draft.quiz_question.clone(),
            quiz_options: draft.quiz_options.clone(),
            correct_answer_index: draft.correct_answer_index,
            points: draft.points,
        };
        let options = block.quiz_options.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().await;
        // One statement: a bad section id fails the whole write and keeps the old row
        conn.execute(
            r#"INSERT INTO blocks
               (id, section_id, title, sort_order, video_url, document_url, content_markdown,
                quiz_question, quiz_options, correct_answer_index, points)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(id) DO UPDATE SET
                section_id = excluded.section_id, title = excluded.title,
                sort_order = excluded.sort_order, video_url = excluded.video_url,
                document_url = excluded.document_url, content_markdown = excluded.content_markdown,
                quiz_question = excluded.quiz_question, quiz_options = excluded.quiz_options,
                correct_answer_index = excluded.correct_answer_index, points = excluded.points"#,
            params![
                block.id,
                draft.section_id,
                block.title,
                block.order,
                block.video_url,
                block.document_url,
                block.content_markdown,
                block.quiz_question,
                options,
                block.correct_answer_index.map(|i| i as i64),
                block.points,
            ],
        )?;
        Ok(())
    }

    async fn delete_content(&self, kind: ContentKind, id: &str) -> BackendResult<()> {
        let conn = self.conn.lock().await;
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        let removed = conn.execute(&sql, params![id])?;
        if removed == 0 {
            return Err(BackendError::NotFound(format!("{} {}", kind, id)));
        }
        Ok(())
    }
}
