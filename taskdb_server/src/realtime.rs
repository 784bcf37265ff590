//! Real-time channel over a plain WebSocket.
//!
//! Clients send `{"event": "...", "ack": n, "data": {...}}` frames and get
//! `{"ack": n, "data": {...}}` back, or `{"ack": n, "error": "...", "code": 404}`.
//! After any task write, from this socket or any other front-end, every
//! connection of the same owner receives a push such as
//! `{"event": "taskCreated", "data": {"task": {...}}}`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use taskdb::{ChangeKind, ChangeNotification, NewTask, StatusFilter, TaskPatch};
use tokio::select;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticates at the handshake; a rejected session never upgrades. The
/// change subscription is taken before the upgrade response goes out, so no
/// write made after the client sees the handshake is missed.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    ws: WebSocketUpgrade,
) -> Response {
    let changes = state.tasks.subscribe();
    ws.on_upgrade(move |socket| Connection::new(state, principal, changes, socket).run())
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    ack: Option<u64>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FilterPayload {
    #[serde(default)]
    filter: Option<String>,
}

struct Connection {
    state: Arc<AppState>,
    principal: Principal,
    sink: SplitSink<WebSocket, Message>,
    stream: SplitStream<WebSocket>,
    changes: broadcast::Receiver<ChangeNotification>,
}

impl Connection {
    fn new(
        state: Arc<AppState>,
        principal: Principal,
        changes: broadcast::Receiver<ChangeNotification>,
        socket: WebSocket,
    ) -> Self {
        let (sink, stream) = socket.split();
        Self {
            state,
            principal,
            sink,
            stream,
            changes,
        }
    }

    async fn run(mut self) {
        let who = self
            .principal
            .0
            .as_ref()
            .map_or("anonymous".to_string(), |c| c.username.clone());
        log::info!("Socket connected for {who}");

        loop {
            select! {
                incoming = self.stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = self.handle_frame(&text).await;
                        if self.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Socket error for {who}: {e}");
                        break;
                    }
                },
                change = self.changes.recv() => match change {
                    Ok(notification) => {
                        if !notification.is_visible_to(self.principal.owner()) {
                            continue;
                        }
                        if self.send(push_frame(&notification)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Socket for {who} missed {skipped} change notifications");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        log::info!("Socket disconnected for {who}");
    }

    async fn send(&mut self, frame: Value) -> Result<(), axum::Error> {
        self.sink.send(Message::Text(frame.to_string())).await
    }

    async fn handle_frame(&self, text: &str) -> Value {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => return error_frame(None, ApiError::BadRequest(format!("Malformed frame: {e}"))),
        };
        match self.dispatch(&frame.event, frame.data).await {
            Ok(data) => json!({ "ack": frame.ack, "data": data }),
            Err(e) => error_frame(frame.ack, e),
        }
    }

    async fn dispatch(&self, event: &str, data: Value) -> Result<Value, ApiError> {
        let tasks = &self.state.tasks;
        let owner = self.principal.owner();
        match event {
            "getTasks" => {
                let payload: FilterPayload = if data.is_null() {
                    FilterPayload::default()
                } else {
                    parse(data)?
                };
                let filter = payload
                    .filter
                    .as_deref()
                    .unwrap_or_default()
                    .parse::<StatusFilter>()
                    .unwrap_or_default();
                Ok(json!({ "tasks": tasks.list(owner, filter).await? }))
            }
            "getTask" => {
                let IdPayload { id } = parse(data)?;
                Ok(json!({ "task": tasks.get(&id, owner).await? }))
            }
            "createTask" => {
                let new: NewTask = parse(data)?;
                Ok(json!({ "task": tasks.create(owner, new).await? }))
            }
            "updateTask" => {
                let IdPayload { id } = parse(data.clone())?;
                let patch: TaskPatch = parse(data)?;
                Ok(json!({ "task": tasks.update(&id, owner, patch).await? }))
            }
            "toggleTask" => {
                let IdPayload { id } = parse(data)?;
                Ok(json!({ "task": tasks.toggle(&id, owner).await? }))
            }
            "deleteTask" => {
                let IdPayload { id } = parse(data)?;
                tasks.delete(&id, owner).await?;
                Ok(json!({ "message": "Deleted" }))
            }
            "whoami" => {
                let user = self
                    .principal
                    .0
                    .as_ref()
                    .map(|c| json!({ "id": c.id, "username": c.username }));
                Ok(json!({ "user": user }))
            }
            other => Err(ApiError::BadRequest(format!("Unknown event {other:?}"))),
        }
    }
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::BadRequest(format!("Invalid payload: {e}")))
}

fn error_frame(ack: Option<u64>, error: ApiError) -> Value {
    if let ApiError::Internal(detail) = &error {
        log::error!("Socket request failed: {detail}");
    }
    json!({
        "ack": ack,
        "error": error.message(),
        "code": error.status().as_u16(),
    })
}

fn push_frame(notification: &ChangeNotification) -> Value {
    match notification.kind {
        ChangeKind::Created => json!({ "event": "taskCreated", "data": { "task": notification.task } }),
        ChangeKind::Updated => json!({ "event": "taskUpdated", "data": { "task": notification.task } }),
        ChangeKind::Deleted => json!({ "event": "taskDeleted", "data": { "id": notification.task_id } }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use taskdb::Task;

    use super::*;

    fn task() -> Task {
        Task {
            id: "t1".into(),
            owner_id: Some("u1".into()),
            title: "x".into(),
            description: String::new(),
            due_date: None,
            completed: false,
            created_at: Utc::now(),
            updated_at: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_push_frames() {
        let created = push_frame(&ChangeNotification::created(&task()));
        assert_eq!(created["event"], "taskCreated");
        assert_eq!(created["data"]["task"]["id"], "t1");

        let deleted = push_frame(&ChangeNotification::deleted(&task()));
        assert_eq!(deleted["event"], "taskDeleted");
        assert_eq!(deleted["data"]["id"], "t1");
    }

    #[test]
    fn test_error_frame_hides_internal_detail() {
        let frame = error_frame(Some(3), ApiError::internal("disk on fire"));
        assert_eq!(frame["ack"], 3);
        assert_eq!(frame["error"], "Server error");
        assert_eq!(frame["code"], 500);
    }
}
