//! WebSocket support for real-time dashboard updates.
//!
//! Clients receive a `stats_update` message whenever any job changes, plus
//! one immediately on connect. Messages carry the full statistics snapshot
//! and the map of unfinished jobs keyed by id, so a client can always render
//! from the latest message alone.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use streamvault_core::{
    DownloadOrchestrator, Job, JobFilter, JobState, OrchestratorError, Statistics,
};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// One unfinished job as shown to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDownloadView {
    pub id: String,
    pub url: String,
    pub state: JobState,
    pub title: Option<String>,
    pub progress_percent: f32,
    pub speed_bytes_per_sec: u64,
    pub eta_seconds: Option<u64>,
}

impl From<Job> for ActiveDownloadView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            url: job.source_url,
            state: job.state,
            title: job.title,
            progress_percent: job.progress_percent,
            speed_bytes_per_sec: job.speed_bytes_per_sec,
            eta_seconds: job.eta_seconds,
        }
    }
}

/// WebSocket message sent to clients for real-time updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full statistics snapshot plus every queued, scheduled or downloading
    /// job, keyed by job id.
    StatsUpdate {
        stats: Statistics,
        active_downloads: BTreeMap<String, ActiveDownloadView>,
    },
    /// Server heartbeat (sent periodically to keep connection alive).
    Heartbeat { timestamp: i64 },
}

/// Build the current `stats_update` message from the orchestrator.
pub fn build_stats_update(
    orchestrator: &DownloadOrchestrator,
) -> Result<WsMessage, OrchestratorError> {
    let stats = orchestrator.statistics()?;
    let jobs = orchestrator.list_jobs(&JobFilter::new().with_limit(i64::MAX))?;

    let active_downloads = jobs
        .into_iter()
        .filter(Job::is_active)
        .map(|job| (job.id.clone(), ActiveDownloadView::from(job)))
        .collect();

    Ok(WsMessage::StatsUpdate {
        stats,
        active_downloads,
    })
}

/// Broadcaster for WebSocket messages using tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct WsBroadcaster {
    sender: broadcast::Sender<WsMessage>,
}

impl WsBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast a message to all connected clients.
    pub fn broadcast(&self, msg: WsMessage) {
        // Ignore send errors - they just mean no one is listening
        let _ = self.sender.send(msg);
    }

    /// Subscribe to receive messages.
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.sender.subscribe()
    }
}

impl Default for WsBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the initial snapshot so no update is missed.
    let mut rx = state.ws_broadcaster().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    // New clients get the current snapshot immediately.
    match build_stats_update(state.orchestrator()) {
        Ok(msg) => {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    WS_CONNECTIONS_ACTIVE.dec();
                    return;
                }
                WS_MESSAGES_SENT.with_label_values(&["stats_update"]).inc();
            }
        }
        Err(e) => error!("Failed to build initial stats snapshot: {}", e),
    }

    // Forward broadcast messages to this client, with a periodic heartbeat
    // so idle connections stay alive through proxies.
    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
        // The first tick fires immediately; the snapshot above covers it.
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // A slow client only loses intermediate snapshots;
                        // the next message carries the full state again.
                        warn!("WebSocket client lagged, skipped {} messages", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: chrono::Utc::now().timestamp(),
                },
            };

            let msg_type = match &msg {
                WsMessage::StatsUpdate { .. } => "stats_update",
                WsMessage::Heartbeat { .. } => "heartbeat",
            };

            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                    WS_MESSAGES_SENT.with_label_values(&[msg_type]).inc();
                }
                Err(e) => {
                    error!("Failed to serialize WsMessage: {}", e);
                }
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close)
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Ping(data)) => {
                // Pong is handled automatically by axum
                debug!("Received ping: {:?}", data);
            }
            Ok(Message::Text(text)) => {
                // We don't expect any client messages, but log them
                debug!("Received text message: {}", text);
            }
            Ok(_) => {
                // Ignore other message types
            }
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    // Clean up
    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
