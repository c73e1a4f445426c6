use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::SharedState;
use crate::auth::CurrentUser;
use crate::models::{Assignment, Event, Task, TaskStatus};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    AssignmentCreated {
        assignment: Assignment,
    },
    AssignmentUpdated {
        assignment: Assignment,
    },
    AssignmentDeleted {
        assignment_id: i64,
    },
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskMoved {
        task_id: i64,
        assignment_id: i64,
        from_status: TaskStatus,
        to_status: TaskStatus,
        position: i32,
    },
    TaskDeleted {
        task_id: i64,
        assignment_id: i64,
    },
    ProgressChanged {
        assignment_id: i64,
        progress: u8,
    },
    EventCreated {
        event: Event,
    },
    EventUpdated {
        event: Event,
    },
    EventDeleted {
        event_id: i64,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    user: CurrentUser,
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    tracing::debug!(user_id = user.user.id, "websocket client connected");
    let rx = state.ws_tx.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx).await;
    tracing::debug!("websocket client disconnected");
}

/// Forward broadcasts to the client and keep the connection alive with
/// ping/pong. The loop exits when no Pong arrives within [`PONG_TIMEOUT`]
/// of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagging, dropped messages");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Clients only listen
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Having no subscribers is not an error.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize WsMessage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;

    fn sample_task() -> Task {
        Task {
            id: 3,
            assignment_id: 1,
            title: "Outline".to_string(),
            description: String::new(),
            status: TaskStatus::ToDo,
            priority: TaskPriority::Medium,
            due_date: None,
            weighting: None,
            position: 0,
            created_at: "2025-01-01".to_string(),
            updated_at: "2025-01-01".to_string(),
        }
    }

    #[test]
    fn test_task_created_serialization() {
        let msg = WsMessage::TaskCreated {
            task: sample_task(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"TaskCreated\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"title\":\"Outline\""));
    }

    #[test]
    fn test_task_moved_uses_status_labels() {
        let msg = WsMessage::TaskMoved {
            task_id: 3,
            assignment_id: 1,
            from_status: TaskStatus::ToDo,
            to_status: TaskStatus::InProgress,
            position: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"from_status\":\"To-Do\""));
        assert!(json.contains("\"to_status\":\"In Progress\""));
    }

    #[test]
    fn test_progress_changed_roundtrip() {
        let msg = WsMessage::ProgressChanged {
            assignment_id: 9,
            progress: 40,
        };
        let json = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str::<WsMessage>(&json).unwrap() {
            WsMessage::ProgressChanged {
                assignment_id,
                progress,
            } => {
                assert_eq!(assignment_id, 9);
                assert_eq!(progress, 40);
            }
            other => panic!("Expected ProgressChanged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        broadcast_message(&tx, &WsMessage::EventDeleted { event_id: 4 });
        let received = rx.recv().await.unwrap();
        assert!(received.contains("\"EventDeleted\""));
        assert!(received.contains("\"event_id\":4"));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel::<String>(8);
        drop(rx);
        broadcast_message(&tx, &WsMessage::AssignmentDeleted { assignment_id: 1 });
    }
}
