//! WebSocket stream of simulation batches.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, SnapshotEvent};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Current snapshot as an event, if a batch has been generated yet.
async fn initial_event(state: &AppState) -> Option<SnapshotEvent> {
    let live = state.live.lock().await;
    let first = live.snapshot.first()?;
    Some(SnapshotEvent {
        tick: live.ticks,
        timestamp: first.timestamp,
        readings: live.snapshot.clone(),
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no batch falls in between
    let mut rx = state.snapshots_tx.subscribe();

    info!("WebSocket client connected");

    if let Some(event) = initial_event(&state).await
        && let Ok(json) = serde_json::to_string(&event)
        && sender.send(Message::Text(json.into())).await.is_err()
    {
        info!("WebSocket client disconnected during initial snapshot");
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged, skipped {} batches", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize snapshot: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use airwatch_store::Store;
    use airwatch_types::{ROSTER, RawReading};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_initial_event() {
        let state = AppState::new(Store::open_in_memory().unwrap(), Config::default());
        assert!(initial_event(&state).await.is_none());

        let at = datetime!(2024-06-01 09:00:00 UTC);
        let reading = RawReading::generate(&ROSTER[1], &mut StdRng::seed_from_u64(1), at);
        {
            let mut live = state.live.lock().await;
            live.snapshot = vec![reading];
            live.ticks = 4;
        }

        let event = initial_event(&state).await.unwrap();
        assert_eq!(event.tick, 4);
        assert_eq!(event.timestamp, at);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["readings"][0]["name"], "KP-003");
        assert_eq!(json["timestamp"], "2024-06-01T09:00:00Z");
    }
}
