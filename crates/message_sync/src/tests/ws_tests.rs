use super::*;

use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use shared::domain::UserId;
use tokio::{net::TcpListener, sync::oneshot};

async fn echo_register_then_push(mut socket: WebSocket, seen: oneshot::Sender<String>) {
    let Some(Ok(AxumMessage::Text(first))) = socket.recv().await else {
        return;
    };
    let _ = seen.send(first);
    let push = json!({
        "event": "receiveMessage",
        "data": {
            "_id": "m-1",
            "matchId": "match-1",
            "sender": "peer",
            "content": "hello",
            "timestamp": "2024-05-01T10:00:00Z"
        }
    });
    let _ = socket.send(AxumMessage::Text("not json".into())).await;
    let _ = socket.send(AxumMessage::Text(push.to_string())).await;
    let _ = socket.send(AxumMessage::Close(None)).await;
}

async fn spawn_socket_server() -> (String, oneshot::Receiver<String>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (seen_tx, seen_rx) = oneshot::channel();
    let seen_tx = std::sync::Arc::new(std::sync::Mutex::new(Some(seen_tx)));
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| {
            let seen_tx = seen_tx.clone();
            async move {
                ws.on_upgrade(move |socket| async move {
                    let sender = seen_tx.lock().ok().and_then(|mut guard| guard.take());
                    if let Some(sender) = sender {
                        echo_register_then_push(socket, sender).await;
                    }
                })
                .into_response()
            }
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), seen_rx)
}

async fn next_event(receiver: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("event timeout")
        .expect("channel open")
}

#[test]
fn socket_url_follows_server_scheme() {
    assert_eq!(
        WsTransport::socket_url("https://chat.example.com/")
            .expect("url")
            .as_str(),
        "wss://chat.example.com/ws"
    );
    assert_eq!(
        WsTransport::socket_url("http://127.0.0.1:3000/api")
            .expect("url")
            .as_str(),
        "ws://127.0.0.1:3000/api/ws"
    );
    assert!(WsTransport::socket_url("ftp://example.com").is_err());
}

#[tokio::test]
async fn emit_without_connection_is_unavailable() {
    let transport = WsTransport {
        outbound: Mutex::new(None),
    };
    let err = transport
        .emit(OutboundEvent::Register(UserId::from("me")))
        .await
        .expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::Unavailable)
    ));
}

#[tokio::test]
async fn connects_emits_and_decodes_inbound_frames() {
    let (server_url, seen_rx) = spawn_socket_server().await;
    let settings = SyncSettings {
        reconnect_attempts: 0,
        reconnect_delay_ms: 10,
        ..SyncSettings::default()
    };
    let url = WsTransport::socket_url(&server_url).expect("socket url");
    let (transport, mut events, task) = WsTransport::spawn(url, &settings);

    assert_eq!(next_event(&mut events).await, TransportEvent::Connecting);
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    transport
        .emit(OutboundEvent::Register(UserId::from("me")))
        .await
        .expect("emit");
    let frame = tokio::time::timeout(Duration::from_secs(5), seen_rx)
        .await
        .expect("frame timeout")
        .expect("frame");
    let frame: serde_json::Value = serde_json::from_str(&frame).expect("json frame");
    assert_eq!(frame, json!({ "event": "register", "data": "me" }));

    match next_event(&mut events).await {
        TransportEvent::Inbound(InboundEvent::ReceiveMessage(payload)) => {
            assert_eq!(payload.message_id(), Some("m-1"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, TransportEvent::Disconnected);

    drop(events);
    task.abort();
}
