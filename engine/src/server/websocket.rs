//! WebSocket handler streaming manager state and cache changes

use crate::db::{CacheChange, Statistic, VpnProfile};
use crate::session::SessionStatus;
use crate::sync::{SearchState, TaskState};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// One message pushed to WebSocket clients
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Session { status: SessionStatus },
    Tasks { state: TaskState },
    Search { state: SearchState },
    Statistics { statistic: Option<Statistic> },
    Vpn { profiles: Vec<VpnProfile> },
    Cache { change: CacheChange },
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Each observable subscription replays its current value first
    let engine = &state.engine;
    let mut session_rx = engine.session().state().subscribe();
    let mut tasks_rx = engine.tasks().state().subscribe();
    let mut search_rx = engine.search().state().subscribe();
    let mut statistics_rx = engine.statistics().current().subscribe();
    let mut vpn_rx = engine.vpn().profiles().subscribe();
    let mut cache_rx = engine.cache().subscribe();

    info!("WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(status) = session_rx.recv() => Event::Session { status },
                Some(state) = tasks_rx.recv() => Event::Tasks { state },
                Some(state) = search_rx.recv() => Event::Search { state },
                Some(statistic) = statistics_rx.recv() => Event::Statistics { statistic },
                Some(profiles) = vpn_rx.recv() => Event::Vpn { profiles },
                change = cache_rx.recv() => match change {
                    Ok(change) => Event::Cache { change },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, {} cache changes dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                else => break,
            };

            let msg = match serde_json::to_string(&event) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => debug!("Ignoring WebSocket message: {}", text),
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::Tasks {
            state: TaskState::ActionRunning,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "tasks", "state": "action_running" })
        );

        let event = Event::Cache {
            change: CacheChange::VpnProfiles,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "cache", "change": "vpn_profiles" })
        );
    }
}
