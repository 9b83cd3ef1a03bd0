//! Score change feed
//!
//! Backends publish a [`ScoreEvent`] whenever the score table changes;
//! leaderboard views subscribe and refresh.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A change on the score table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreEvent {
    /// A row was inserted, updated or deleted
    Changed { user_id: Option<String> },
    /// The listener reconnected; the board may have missed changes
    Resynced,
}

/// Broadcast channel for score events
#[derive(Clone)]
pub struct ScoreFeed {
    tx: broadcast::Sender<ScoreEvent>,
}

impl ScoreFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ScoreEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScoreEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ScoreFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let feed = ScoreFeed::new();
        feed.publish(ScoreEvent::Resynced);

        let mut rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);
        feed.publish(ScoreEvent::Changed { user_id: Some("u1".into()) });
        assert_eq!(rx.recv().await.unwrap(), ScoreEvent::Changed { user_id: Some("u1".into()) });
    }

    #[test]
    fn test_clones_share_one_channel() {
        let feed = ScoreFeed::default();
        let publisher = feed.clone();
        let mut rx = feed.subscribe();

        publisher.publish(ScoreEvent::Resynced);
        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(event, ScoreEvent::Resynced);
    }
}
