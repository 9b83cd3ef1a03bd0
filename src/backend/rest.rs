//! Hosted backend over REST
//!
//! Talks to a PostgREST-style data API (`/rest/v1`), a token auth service
//! (`/auth/v1`) and a handful of RPC procedures. Requests carry the project's
//! anon key as `apikey` and the user's access token as bearer when signed in.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::realtime::{self, RealtimeOptions};
use super::{
    Achievement, AuthUser, BlockDraft, CategoryDraft, Challenge, ChallengeDraft, ChapterDraft,
    ContentKind, FactionStanding, LeaderboardRow, LearningBackend, ProfileRecord, ScoreFeed,
    ScoreInfo, SectionDraft, Session,
};
use crate::error::{BackendError, BackendResult};
use crate::learning::achievements::AchievementCode;
use crate::learning::{Category, ProgressSnapshot};

/// REST implementation of [`LearningBackend`]
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    changes: watch::Sender<Option<AuthUser>>,
    feed: ScoreFeed,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct ProgressRow {
    #[serde(default)]
    completed_blocks: Option<Vec<Value>>,
    #[serde(default)]
    awarded_points_blocks: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct AchievementRow {
    earned_at: DateTime<Utc>,
    achievements: AchievementDef,
}

#[derive(Debug, Deserialize)]
struct AchievementDef {
    code: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon_url: Option<String>,
}

/// Ids in progress arrays may be stored as strings or numbers
fn ids_from_values(values: Option<Vec<Value>>) -> Vec<String> {
    values
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Network(format!("failed to create HTTP client: {}", e)))?;
        let (changes, _) = watch::channel(None);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            changes,
            feed: ScoreFeed::new(),
        })
    }

    /// Start the websocket listener that feeds [`LearningBackend::score_feed`]
    pub fn spawn_realtime(&self, heartbeat: Duration) -> BackendResult<JoinHandle<()>> {
        let url = realtime::realtime_url(&self.base_url, &self.anon_key)?;
        Ok(realtime::spawn_listener(RealtimeOptions { url, heartbeat }, self.feed.clone()))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().and_then(|s| s.access_token.clone()))
    }

    fn signed_in_user(&self) -> BackendResult<AuthUser> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.user.clone()))
            .ok_or(BackendError::Unauthenticated)
    }

    fn store_session(&self, session: Option<Session>) {
        let user = session.as_ref().map(|s| s.user.clone());
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
        self.changes.send_replace(user);
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let bearer = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => BackendError::Unauthenticated,
            StatusCode::NOT_FOUND => BackendError::NotFound(body),
            StatusCode::CONFLICT => BackendError::Conflict(body),
            StatusCode::BAD_REQUEST if body.contains("invalid_grant") || body.contains("Invalid login") => {
                BackendError::InvalidCredentials(body)
            }
            _ => BackendError::Status { status: status.as_u16(), message: body },
        })
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BackendResult<T> {
        let response = Self::check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, builder: RequestBuilder) -> BackendResult<()> {
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    async fn rpc(&self, name: &str, args: Value) -> BackendResult<()> {
        let url = self.rest_url(&format!("rpc/{}", name));
        debug!("Calling rpc {}", name);
        self.send_empty(self.request(Method::POST, &url).json(&args)).await
    }

    async fn upsert<T: serde::Serialize + ?Sized>(&self, table: &str, body: &T) -> BackendResult<()> {
        let url = self.rest_url(table);
        self.send_empty(
            self.request(Method::POST, &url)
                .header("Prefer", "resolution=merge-duplicates")
                .json(body),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=refresh_token");
        let token: TokenResponse = self
            .send(
                self.client
                    .post(&url)
                    .header("apikey", &self.anon_key)
                    .json(&json!({ "refresh_token": refresh_token })),
            )
            .await?;
        Ok(Session { user: token.user, access_token: Some(token.access_token), refresh_token: token.refresh_token })
    }
}

#[async_trait]
impl LearningBackend for RestBackend {
    async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> BackendResult<AuthUser> {
        let url = self.auth_url("signup");
        let body = json!({
            "email": email,
            "password": password,
            "data": { "full_name": full_name },
        });
        let value: Value = self
            .send(self.client.post(&url).header("apikey", &self.anon_key).json(&body))
            .await?;

        let user: AuthUser = serde_json::from_value(value.get("user").cloned().unwrap_or_else(|| value.clone()))?;

        // Seed score and profile rows when the service hands back a session right away
        if let Some(token) = value.get("access_token").and_then(Value::as_str) {
            let bearer = format!("Bearer {}", token);
            let score = json!([{ "user_id": user.id, "username": user.email, "full_name": full_name, "points": 0 }]);
            let profile = json!([{ "id": user.id, "role": "user" }]);
            for (table, row) in [("scores", score), ("profiles", profile)] {
                let request = self
                    .client
                    .post(self.rest_url(table))
                    .header("apikey", &self.anon_key)
                    .header("Authorization", &bearer)
                    .json(&row);
                if let Err(e) = self.send_empty(request).await {
                    warn!("Could not create {} row for {}: {}", table, user.email, e);
                }
            }
        }

        info!("Registered {}", user.email);
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=password");
        let token: TokenResponse = self
            .send(
                self.client
                    .post(&url)
                    .header("apikey", &self.anon_key)
                    .json(&json!({ "email": email, "password": password })),
            )
            .await
            .map_err(|e| match e {
                BackendError::Status { status: 400, message } => BackendError::InvalidCredentials(message),
                other => other,
            })?;

        let session = Session {
            user: token.user,
            access_token: Some(token.access_token),
            refresh_token: token.refresh_token,
        };
        self.store_session(Some(session.clone()));
        info!("Signed in as {}", session.user.email);
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let result = if self.access_token().is_some() {
            self.send_empty(self.request(Method::POST, &self.auth_url("logout"))).await
        } else {
            Ok(())
        };
        self.store_session(None);
        result
    }

    async fn restore_session(&self, session: &Session) -> BackendResult<AuthUser> {
        self.store_session(Some(session.clone()));

        let url = self.auth_url("user");
        match self.send::<AuthUser>(self.request(Method::GET, &url)).await {
            Ok(user) => {
                self.store_session(Some(Session { user: user.clone(), ..session.clone() }));
                Ok(user)
            }
            Err(BackendError::Unauthenticated) => {
                let refresh_token = session.refresh_token.as_deref().ok_or(BackendError::Unauthenticated)?;
                debug!("Access token expired, refreshing");
                match self.refresh(refresh_token).await {
                    Ok(renewed) => {
                        let user = renewed.user.clone();
                        self.store_session(Some(renewed));
                        Ok(user)
                    }
                    Err(e) => {
                        self.store_session(None);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.store_session(None);
                Err(e)
            }
        }
    }

    fn session_changes(&self) -> watch::Receiver<Option<AuthUser>> {
        self.changes.subscribe()
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn score_feed(&self) -> ScoreFeed {
        self.feed.clone()
    }

    async fn get_profile(&self, user_id: &str) -> BackendResult<ProfileRecord> {
        let url = self.rest_url("profiles");
        let rows: Vec<ProfileRecord> = self
            .send(self.request(Method::GET, &url).query(&[("id", eq(user_id)), ("select", "role,faction".into())]))
            .await?;
        if let Some(record) = rows.into_iter().next() {
            return Ok(record);
        }

        info!("No profile for {}, creating one", user_id);
        let created: Vec<ProfileRecord> = self
            .send(
                self.request(Method::POST, &url)
                    .header("Prefer", "return=representation")
                    .query(&[("select", "role,faction")])
                    .json(&json!([{ "id": user_id, "role": "user" }])),
            )
            .await?;
        created.into_iter().next().ok_or_else(|| BackendError::NotFound(format!("profile {}", user_id)))
    }

    async fn get_score_info(&self, user_id: &str) -> BackendResult<Option<ScoreInfo>> {
        let url = self.rest_url("scores");
        let rows: Vec<ScoreInfo> = self
            .send(
                self.request(Method::GET, &url)
                    .query(&[("user_id", eq(user_id)), ("select", "username,full_name,points".into())]),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn update_faction(&self, user_id: &str, faction: &str) -> BackendResult<ProfileRecord> {
        let url = self.rest_url("profiles");
        let rows: Vec<ProfileRecord> = self
            .send(
                self.request(Method::PATCH, &url)
                    .header("Prefer", "return=representation")
                    .query(&[("id", eq(user_id)), ("select", "role,faction".into())])
                    .json(&json!({ "faction": faction })),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| BackendError::NotFound(format!("profile {}", user_id)))
    }

    async fn update_username(&self, user_id: &str, username: &str) -> BackendResult<ScoreInfo> {
        let url = self.rest_url("scores");
        let rows: Vec<ScoreInfo> = self
            .send(
                self.request(Method::PATCH, &url)
                    .header("Prefer", "return=representation")
                    .query(&[("user_id", eq(user_id)), ("select", "username,full_name,points".into())])
                    .json(&json!({ "full_name": username })),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| BackendError::NotFound(format!("score row {}", user_id)))
    }

    async fn fetch_learning_tree(&self) -> BackendResult<Vec<Category>> {
        let url = self.rest_url("categories");
        let query = [
            ("select", "*,chapters(*,sections(*,blocks(*)))"),
            ("order", "order.asc"),
            ("chapters.order", "order.asc"),
            ("chapters.sections.order", "order.asc"),
            ("chapters.sections.blocks.order", "order.asc"),
        ];
        let categories: Vec<Category> = self.send(self.request(Method::GET, &url).query(&query)).await?;
        debug!("Fetched {} categories", categories.len());
        Ok(categories)
    }

    async fn fetch_progress(&self, user_id: &str) -> BackendResult<ProgressSnapshot> {
        let url = self.rest_url("user_progress");
        let rows: Vec<ProgressRow> = self
            .send(
                self.request(Method::GET, &url)
                    .query(&[("user_id", eq(user_id)), ("select", "completed_blocks,awarded_points_blocks".into())]),
            )
            .await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| ProgressSnapshot {
                completed: ids_from_values(row.completed_blocks),
                awarded: ids_from_values(row.awarded_points_blocks),
            })
            .unwrap_or_default())
    }

    async fn save_progress(&self, user_id: &str, progress: &ProgressSnapshot) -> BackendResult<()> {
        let row = json!({
            "user_id": user_id,
            "completed_blocks": progress.completed,
            "awarded_points_blocks": progress.awarded,
            "updated_at": Utc::now().to_rfc3339(),
        });
        self.upsert("user_progress?on_conflict=user_id", &row).await
    }

    async fn reset_progress(&self, _user_id: &str) -> BackendResult<()> {
        self.rpc("reset_user_progress", json!({})).await
    }

    async fn award_points(&self, user_id: &str, amount: u32) -> BackendResult<()> {
        let user = self.signed_in_user()?;
        if user.id != user_id {
            return Err(BackendError::Unauthenticated);
        }
        self.rpc("add_points", json!({ "user_email": user.email, "points_to_add": amount })).await
    }

    async fn award_achievement(&self, _user_id: &str, code: AchievementCode) -> BackendResult<()> {
        self.rpc("award_achievement", json!({ "achievement_code": code.as_str() })).await
    }

    async fn fetch_achievements(&self, user_id: &str) -> BackendResult<Vec<Achievement>> {
        let url = self.rest_url("user_achievements");
        let rows: Vec<AchievementRow> = self
            .send(self.request(Method::GET, &url).query(&[
                ("user_id", eq(user_id)),
                ("select", "earned_at,achievements(code,name,description,icon_url)".into()),
                ("order", "earned_at.desc".into()),
            ]))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Achievement {
                code: row.achievements.code,
                name: row.achievements.name,
                description: row.achievements.description.unwrap_or_default(),
                icon_url: row.achievements.icon_url,
                earned_at: row.earned_at,
            })
            .collect())
    }

    async fn fetch_leaderboard(&self, limit: usize) -> BackendResult<Vec<LeaderboardRow>> {
        let url = self.rest_url("scores");
        self.send(self.request(Method::GET, &url).query(&[
            ("select", "user_id,username,full_name,points".to_string()),
            ("order", "points.desc".to_string()),
            ("limit", limit.to_string()),
        ]))
        .await
    }

    async fn fetch_faction_leaderboard(&self) -> BackendResult<Vec<FactionStanding>> {
        let url = self.rest_url("faction_leaderboard");
        self.send(self.request(Method::GET, &url).query(&[("select", "*"), ("order", "total_points.desc")]))
            .await
    }

    async fn fetch_active_challenges(&self) -> BackendResult<Vec<Challenge>> {
        let url = self.rest_url("challenges");
        let now = Utc::now().to_rfc3339();
        self.send(self.request(Method::GET, &url).query(&[
            ("select", "*".to_string()),
            ("is_active", "eq.true".to_string()),
            ("start_date", format!("lte.{}", now)),
            ("end_date", format!("gte.{}", now)),
        ]))
        .await
    }

    async fn fetch_challenges(&self) -> BackendResult<Vec<Challenge>> {
        let url = self.rest_url("challenges");
        self.send(self.request(Method::GET, &url).query(&[("select", "*"), ("order", "start_date.desc")]))
            .await
    }

    async fn upsert_challenge(&self, draft: &ChallengeDraft) -> BackendResult<()> {
        self.upsert("challenges", draft).await
    }

    async fn finish_challenge(&self, challenge_id: &str) -> BackendResult<()> {
        self.rpc("finish_challenge", json!({ "challenge_id": challenge_id })).await?;
        info!("Finished challenge {}", challenge_id);
        Ok(())
    }

    async fn upsert_category(&self, draft: &CategoryDraft) -> BackendResult<()> {
        self.upsert("categories", draft).await
    }

    async fn upsert_chapter(&self, draft: &ChapterDraft) -> BackendResult<()> {
        self.upsert("chapters", draft).await
    }

    async fn upsert_section(&self, draft: &SectionDraft) -> BackendResult<()> {
        self.upsert("sections", draft).await
    }

    async fn upsert_block(&self, draft: &BlockDraft) -> BackendResult<()> {
        self.upsert("blocks", draft).await
    }

    async fn delete_content(&self, kind: ContentKind, id: &str) -> BackendResult<()> {
        let url = self.rest_url(kind.table());
        self.send_empty(self.request(Method::DELETE, &url).query(&[("id", eq(id))])).await
    }
}
