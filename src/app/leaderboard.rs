//! Personal and faction leaderboards
//!
//! Refreshes can overlap (a manual refresh racing a push-triggered one).
//! Every refresh takes a token from [`RequestSequencer`]; a response is only
//! applied if its token is still the newest one issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backend::{FactionStanding, LeaderboardRow, LearningBackend, ScoreEvent};
use crate::error::BackendResult;
use crate::types::Loadable;

/// Monotonic request tokens
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token, invalidating all earlier ones
    pub fn next(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_latest(&self, token: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == token
    }
}

/// What the leaderboard region shows
#[derive(Debug, Clone, Default)]
pub struct LeaderboardPanel {
    pub personal: Loadable<Vec<LeaderboardRow>>,
    pub factions: Loadable<Vec<FactionStanding>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shared handle to the leaderboard region
#[derive(Clone)]
pub struct Leaderboard {
    panel: Arc<Mutex<LeaderboardPanel>>,
    sequencer: Arc<RequestSequencer>,
    limit: usize,
}

impl Leaderboard {
    pub fn new(limit: usize) -> Self {
        Self {
            panel: Arc::new(Mutex::new(LeaderboardPanel::default())),
            sequencer: Arc::new(RequestSequencer::new()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Start a refresh: mark the panel loading and return its token
    pub async fn begin(&self) -> u64 {
        let token = self.sequencer.next();
        let mut panel = self.panel.lock().await;
        if panel.personal.ready().is_none() {
            panel.personal = Loadable::Loading;
        }
        if panel.factions.ready().is_none() {
            panel.factions = Loadable::Loading;
        }
        token
    }

    /// Apply fetched results unless a newer refresh has started since `token`
    pub async fn finish(
        &self,
        token: u64,
        personal: BackendResult<Vec<LeaderboardRow>>,
        factions: BackendResult<Vec<FactionStanding>>,
    ) -> bool {
        let mut panel = self.panel.lock().await;
        if !self.sequencer.is_latest(token) {
            warn!("Discarding stale leaderboard response (token {})", token);
            return false;
        }

        panel.personal = match personal {
            Ok(rows) => Loadable::Ready(rows),
            Err(e) => Loadable::Failed(e.to_string()),
        };
        panel.factions = match factions {
            Ok(rows) => Loadable::Ready(rows),
            Err(e) => Loadable::Failed(e.to_string()),
        };
        panel.updated_at = Some(Utc::now());
        true
    }

    /// Fetch both boards; returns whether the result was applied
    pub async fn refresh<B>(&self, backend: &B) -> bool
    where
        B: LearningBackend + ?Sized,
    {
        let token = self.begin().await;
        let (personal, factions) =
            tokio::join!(backend.fetch_leaderboard(self.limit), backend.fetch_faction_leaderboard());
        self.finish(token, personal, factions).await
    }

    pub async fn snapshot(&self) -> LeaderboardPanel {
        self.panel.lock().await.clone()
    }

    /// Drop all loaded data and invalidate in-flight refreshes
    pub async fn clear(&self) {
        self.sequencer.next();
        *self.panel.lock().await = LeaderboardPanel::default();
    }

    /// Refresh whenever the backend reports a score change
    pub fn spawn_listener<B>(&self, backend: Arc<B>) -> JoinHandle<()>
    where
        B: LearningBackend + ?Sized + 'static,
    {
        let board = self.clone();
        let mut events = backend.score_feed().subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ScoreEvent::Changed { user_id }) => {
                        debug!("Score changed for {:?}, refreshing leaderboards", user_id);
                        board.refresh(backend.as_ref()).await;
                    }
                    Ok(ScoreEvent::Resynced) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        board.refresh(backend.as_ref()).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Score feed closed, leaderboard listener stopping");
                        break;
                    }
                }
            }
        })
    }
}
