use super::*;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use shared::{domain::UserId, error::ErrorCode};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServerState {
    sent: Arc<Mutex<Vec<SendMessageRequest>>>,
    read: Arc<Mutex<Vec<(String, Vec<MessageId>)>>>,
}

async fn handle_history(Path(conversation_id): Path<String>) -> Json<Value> {
    Json(json!({
        "messages": [{
            "_id": "m-1",
            "id": "m-1",
            "matchId": conversation_id,
            "sender": { "_id": "peer" },
            "senderId": "peer",
            "content": "hey",
            "timestamp": "2024-05-01T10:00:00Z",
            "createdAt": "2024-05-01T09:59:59Z"
        }]
    }))
}

async fn handle_send(
    State(state): State<ServerState>,
    Json(payload): Json<SendMessageRequest>,
) -> Json<Value> {
    state.sent.lock().await.push(payload);
    Json(json!({ "success": true, "messageId": "m-2" }))
}

async fn handle_read(
    State(state): State<ServerState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<MarkReadRequest>,
) -> StatusCode {
    state
        .read
        .lock()
        .await
        .push((conversation_id, payload.message_ids));
    StatusCode::NO_CONTENT
}

async fn spawn_persistence_server() -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/conversations/:id/messages", get(handle_history))
        .route("/api/messages", post(handle_send))
        .route("/api/conversations/:id/read", post(handle_read))
        .route(
            "/api/broken/conversations/:id/messages",
            get(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "code": "forbidden", "message": "not your match" })),
                )
            }),
        )
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api/"), state))
}

#[tokio::test]
async fn fetches_wrapped_history() {
    let (server_url, _state) = spawn_persistence_server().await.expect("spawn server");
    let api = HttpPersistenceApi::new(&server_url).expect("api");

    let history = api
        .fetch_history(&ConversationId::from("match-1"))
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    let message = history[0].clone().into_message().expect("convert");
    assert_eq!(message.conversation_id, ConversationId::from("match-1"));
    assert_eq!(message.sender_id, UserId::from("peer"));
    assert_eq!(message.id, MessageId::from("m-1"));
    assert_eq!(message.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
}

#[tokio::test]
async fn sends_message_with_temp_id_and_returns_server_id() {
    let (server_url, state) = spawn_persistence_server().await.expect("spawn server");
    let api = HttpPersistenceApi::new(&server_url).expect("api");
    let request = SendMessageRequest {
        conversation_id: ConversationId::from("match-1"),
        sender_id: UserId::from("me"),
        receiver_id: UserId::from("peer"),
        content: "yo".into(),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 2).unwrap(),
        attachments: Vec::new(),
        temp_id: MessageId::from("temp-1-abcd"),
    };

    let response = api.send_message(request.clone()).await.expect("send");
    assert!(response.success);
    assert_eq!(response.message_id, Some(MessageId::from("m-2")));
    assert_eq!(state.sent.lock().await.as_slice(), &[request]);
}

#[tokio::test]
async fn marks_read_for_conversation() {
    let (server_url, state) = spawn_persistence_server().await.expect("spawn server");
    let api = HttpPersistenceApi::new(&server_url).expect("api");

    api.mark_read(&ConversationId::from("match-1"), &[MessageId::from("m-1")])
        .await
        .expect("mark read");

    let read = state.read.lock().await.clone();
    assert_eq!(
        read,
        vec![("match-1".to_string(), vec![MessageId::from("m-1")])]
    );
}

#[tokio::test]
async fn surfaces_structured_api_errors() {
    let (server_url, _state) = spawn_persistence_server().await.expect("spawn server");
    let api = HttpPersistenceApi::new(&format!("{server_url}broken")).expect("api");

    let err = api
        .fetch_history(&ConversationId::from("match-1"))
        .await
        .expect_err("must fail");
    let api_error = err.downcast_ref::<ApiError>().expect("api error");
    assert_eq!(api_error.code, ErrorCode::Forbidden);
    assert!(err.to_string().contains("403"));
}

#[test]
fn rejects_non_base_urls() {
    assert!(HttpPersistenceApi::new("mailto:team@example.com").is_err());
    assert!(HttpPersistenceApi::new("not a url").is_err());
}

#[tokio::test]
async fn missing_persistence_api_always_fails() {
    let err = MissingPersistenceApi
        .mark_read(&ConversationId::from("match-1"), &[])
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("match-1"));
}
