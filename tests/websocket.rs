//! End-to-end WebSocket behaviour against a tungstenite client.

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use arcway::websocket::{Message as WsMessage, WebSocketController, WebSocketEvent};

mod common;

struct Echo;

impl WebSocketController for Echo {
    fn on_message(&mut self, event: &WebSocketEvent, message: WsMessage) {
        let _ = event.send_message(message.opcode, &message.payload);
    }
}

/// Relays every message to the other connections on the same route.
struct Chat;

impl WebSocketController for Chat {
    fn on_message(&mut self, event: &WebSocketEvent, message: WsMessage) {
        event.broadcast_message(message.opcode, &message.payload);
    }
}

async fn next_message<S>(stream: &mut S) -> Option<Message>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    match tokio::time::timeout(Duration::from_secs(2), stream.next()).await {
        Ok(Some(Ok(message))) => Some(message),
        _ => None,
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let server = common::start(|_| {}, |b| b.websocket("/echo", || Echo)).await;
    let (mut ws, response) = connect_async(server.ws_url("/echo")).await.unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Some(Message::Text("hello".into())));

    let large = vec![7u8; 70_000];
    ws.send(Message::Binary(large.clone().into())).await.unwrap();
    assert_eq!(next_message(&mut ws).await, Some(Message::Binary(large.into())));

    ws.close(None).await.unwrap();
    assert!(common::eventually(|| server.context.peers.get_group("/echo").is_none()).await);
}

#[tokio::test]
async fn broadcast_reaches_other_peers_only() {
    let server = common::start(|_| {}, |b| b.websocket("/chat", || Chat)).await;
    let (mut alice, _) = connect_async(server.ws_url("/chat")).await.unwrap();
    let (mut bob, _) = connect_async(server.ws_url("/chat")).await.unwrap();
    assert!(
        common::eventually(|| {
            server
                .context
                .peers
                .get_group("/chat")
                .is_some_and(|peers| peers.len() == 2)
        })
        .await
    );

    alice.send(Message::Text("hi bob".into())).await.unwrap();
    assert_eq!(next_message(&mut bob).await, Some(Message::Text("hi bob".into())));

    bob.send(Message::Text("hi alice".into())).await.unwrap();
    assert_eq!(next_message(&mut alice).await, Some(Message::Text("hi alice".into())));
}

#[tokio::test]
async fn group_api_relays_between_members() {
    let server = common::start(|c| c.groups.allow = true, |b| b).await;

    let created = reqwest::get(server.http_url("/@set/group?name=lobby"))
        .await
        .unwrap();
    assert_eq!(created.status(), 200);

    let (mut first, _) = connect_async(server.ws_url("/@group?join=lobby")).await.unwrap();
    let (mut second, _) = connect_async(server.ws_url("/@group?join=lobby")).await.unwrap();
    assert!(
        common::eventually(|| {
            server
                .context
                .groups
                .get_group("lobby")
                .is_some_and(|group| group.len() == 2)
        })
        .await
    );

    first.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(next_message(&mut second).await, Some(Message::Text("ping".into())));

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();
    assert!(common::eventually(|| !server.context.groups.group_exists("lobby")).await);
}

#[tokio::test]
async fn private_group_requires_key() {
    let server = common::start(|c| c.groups.allow = true, |b| b).await;

    let created: serde_json::Value =
        reqwest::get(server.http_url("/@set/group?name=vault&visibility=private"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    let key = created["key"].as_str().unwrap().to_string();

    let (mut refused, _) = connect_async(server.ws_url("/@group?join=vault")).await.unwrap();
    assert!(matches!(next_message(&mut refused).await, Some(Message::Close(_)) | None));

    let (_admitted, _) = connect_async(server.ws_url(&format!("/@group?join=vault&key={key}")))
        .await
        .unwrap();
    assert!(
        common::eventually(|| {
            server
                .context
                .groups
                .get_group("vault")
                .is_some_and(|group| group.len() == 1)
        })
        .await
    );
}

#[tokio::test]
async fn unrouted_upgrade_is_closed() {
    let server = common::start(|_| {}, |b| b).await;
    let (mut ws, _) = connect_async(server.ws_url("/nowhere")).await.unwrap();
    assert!(matches!(next_message(&mut ws).await, Some(Message::Close(_)) | None));
    assert!(server.context.peers.is_empty());
}
