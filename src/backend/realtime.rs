//! Realtime score listener
//!
//! Subscribes to Postgres change events on the `scores` table over the
//! backend's Phoenix-channel websocket and republishes them on a
//! [`ScoreFeed`]. The listener reconnects with backoff and publishes
//! [`ScoreEvent::Resynced`] after every reconnect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ScoreEvent, ScoreFeed};
use crate::error::{BackendError, BackendResult};

const TOPIC: &str = "realtime:public:scores";
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    pub url: Url,
    pub heartbeat: Duration,
}

impl RealtimeOptions {
    /// Heartbeat period, never shorter than one second
    fn heartbeat_period(&self) -> Duration {
        self.heartbeat.max(MIN_HEARTBEAT)
    }
}

/// Websocket endpoint for a project base url
pub fn realtime_url(base_url: &str, anon_key: &str) -> BackendResult<Url> {
    let mut url = Url::parse(base_url).map_err(|e| BackendError::Decode(format!("bad backend url: {}", e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(BackendError::Decode(format!("unsupported url scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| BackendError::Decode("cannot switch url to websocket scheme".into()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut().clear().append_pair("apikey", anon_key).append_pair("vsn", "1.0.0");
    Ok(url)
}

fn join_message() -> String {
    json!({
        "topic": TOPIC,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [{ "event": "*", "schema": "public", "table": "scores" }]
            }
        },
        "ref": "1",
    })
    .to_string()
}

fn heartbeat_message(seq: u64) -> String {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": seq.to_string() }).to_string()
}

/// Turn an incoming frame into a score event, if it carries one
pub fn parse_frame(text: &str) -> Option<ScoreEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame["topic"] != TOPIC || frame["event"] != "postgres_changes" {
        return None;
    }
    let data = &frame["payload"]["data"];
    let user_id = data["record"]["user_id"]
        .as_str()
        .or_else(|| data["old_record"]["user_id"].as_str())
        .map(str::to_string);
    Some(ScoreEvent::Changed { user_id })
}

/// Run one connection until it closes or fails
pub async fn listen_once(options: &RealtimeOptions, feed: &ScoreFeed) -> BackendResult<()> {
    let (mut ws_stream, _) = connect_async(options.url.as_str())
        .await
        .map_err(|e| BackendError::Network(format!("realtime connect failed: {}", e)))?;
    info!("Connected to realtime channel");

    ws_stream
        .send(WsMessage::Text(join_message().into()))
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    let mut heartbeat = tokio::time::interval(options.heartbeat_period());
    heartbeat.tick().await;
    let mut seq = 1u64;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                seq += 1;
                ws_stream
                    .send(WsMessage::Text(heartbeat_message(seq).into()))
                    .await
                    .map_err(|e| BackendError::Network(e.to_string()))?;
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = parse_frame(text.as_str()) {
                            debug!("Score change: {:?}", event);
                            feed.publish(event);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Realtime channel closed");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(BackendError::Network(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Keep a listener running in the background
pub fn spawn_listener(options: RealtimeOptions, feed: ScoreFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        let mut connected_before = false;
        loop {
            if connected_before {
                feed.publish(ScoreEvent::Resynced);
            }
            match listen_once(&options, &feed).await {
                Ok(()) => backoff = Duration::from_secs(1),
                Err(e) => {
                    warn!("Realtime listener error: {}", e);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
            connected_before = true;
            if feed.subscriber_count() == 0 {
                error!("No score subscribers left, stopping realtime listener");
                return;
            }
            tokio::time::sleep(backoff).await;
        }
    })
}
