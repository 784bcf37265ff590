use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use taskdb::NewTask;
use taskdb_server::{AppState, Config, router};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (TempDir, Arc<AppState>, SocketAddr) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let state = AppState::new(Config::for_dir(dir.path())).expect("Failed to build state");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (dir, state, addr)
}

/// Register `username` and return a `Cookie` header value for it.
async fn session(state: &AppState, username: &str) -> (String, String) {
    let user = state.users.register(username, "pw").await.unwrap();
    let token = state.tokens.issue(&user).unwrap();
    (user.id, format!("token={token}"))
}

async fn connect(addr: SocketAddr, cookie: Option<&str>) -> Result<Socket, String> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
    }
    connect_async(request)
        .await
        .map(|(socket, _)| socket)
        .map_err(|e| e.to_string())
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn emit(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_handshake_requires_session() {
    let (_dir, _state, addr) = start().await;
    assert!(connect(addr, None).await.is_err());
    assert!(connect(addr, Some("token=nonsense")).await.is_err());
}

#[tokio::test]
async fn test_create_over_socket_acks_and_pushes() {
    let (_dir, state, addr) = start().await;
    let (_, cookie) = session(&state, "alice").await;
    let mut socket = connect(addr, Some(&cookie)).await.expect("Failed to connect");

    emit(
        &mut socket,
        json!({ "event": "createTask", "ack": 1, "data": { "title": "Live task" } }),
    )
    .await;

    let frames = [next_frame(&mut socket).await, next_frame(&mut socket).await];
    let reply = frames
        .iter()
        .find(|f| f["ack"] == 1)
        .expect("Should have received the ack");
    assert_eq!(reply["data"]["task"]["title"], "Live task");
    let push = frames
        .iter()
        .find(|f| f["event"] == "taskCreated")
        .expect("Should have received taskCreated");
    assert_eq!(push["data"]["task"]["id"], reply["data"]["task"]["id"]);

    emit(&mut socket, json!({ "event": "getTasks", "ack": 2, "data": { "filter": "active" } })).await;
    let listed = next_frame(&mut socket).await;
    assert_eq!(listed["ack"], 2);
    assert_eq!(listed["data"]["tasks"].as_array().unwrap().len(), 1);

    emit(&mut socket, json!({ "event": "whoami", "ack": 3 })).await;
    let who = next_frame(&mut socket).await;
    assert_eq!(who["data"]["user"]["username"], "alice");
}

#[tokio::test]
async fn test_errors_are_replied_with_codes() {
    let (_dir, state, addr) = start().await;
    let (_, cookie) = session(&state, "alice").await;
    let mut socket = connect(addr, Some(&cookie)).await.expect("Failed to connect");

    emit(&mut socket, json!({ "event": "getTask", "ack": 7, "data": { "id": "missing" } })).await;
    let reply = next_frame(&mut socket).await;
    assert_eq!(reply["ack"], 7);
    assert_eq!(reply["error"], "Task not found");
    assert_eq!(reply["code"], 404);

    emit(&mut socket, json!({ "event": "createTask", "ack": 8, "data": { "title": "" } })).await;
    let reply = next_frame(&mut socket).await;
    assert_eq!(reply["code"], 400);

    emit(&mut socket, json!({ "event": "launchRocket", "ack": 9 })).await;
    let reply = next_frame(&mut socket).await;
    assert_eq!(reply["code"], 400);
}

#[tokio::test]
async fn test_pushes_reach_only_the_owner() {
    let (_dir, state, addr) = start().await;
    let (alice_id, alice_cookie) = session(&state, "alice").await;
    let (_, bob_cookie) = session(&state, "bob").await;
    let mut alice = connect(addr, Some(&alice_cookie)).await.expect("Failed to connect");
    let mut bob = connect(addr, Some(&bob_cookie)).await.expect("Failed to connect");

    // A write made outside the socket, as the REST routes do.
    let task = state
        .tasks
        .create(Some(&alice_id), NewTask::titled("from elsewhere"))
        .await
        .unwrap();
    state.tasks.delete(&task.id, Some(&alice_id)).await.unwrap();

    let created = next_frame(&mut alice).await;
    assert_eq!(created["event"], "taskCreated");
    let deleted = next_frame(&mut alice).await;
    assert_eq!(deleted["event"], "taskDeleted");
    assert_eq!(deleted["data"]["id"], task.id.as_str());

    let nothing = tokio::time::timeout(Duration::from_millis(300), bob.next()).await;
    assert!(nothing.is_err(), "bob must not see alice's changes");
}
