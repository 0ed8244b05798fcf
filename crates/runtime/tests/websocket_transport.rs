//! WebSocket transport against a local tokio-tungstenite server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tabrelay_protocol::{ContextCommand, ContextEvent, ContextId, RoomId};
use tabrelay_runtime::{CloseReason, Connector, Identity, ReconnectPolicy, RelayHost, WebSocketConnector};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Accepts one client, reports each JSON frame it sends, and replies to
/// `join_room` with a chat message for that room. Closes after `frames` frames.
async fn chat_server(frames: usize) -> (String, mpsc::UnboundedReceiver<Value>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (seen_tx, seen_rx) = mpsc::unbounded_channel();

	tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let mut count = 0;
		while let Some(Ok(message)) = ws.next().await {
			let Message::Text(text) = message else { continue };
			let frame: Value = serde_json::from_str(&text).unwrap();
			if frame["event"] == "join_room" {
				let reply = json!({
					"event": "new_message",
					"data": {
						"roomId": frame["data"]["roomId"],
						"userId": "user_server",
						"username": "Server",
						"message": "welcome",
						"timestamp": 1_700_000_000_000u64
					}
				});
				ws.send(Message::Text(reply.to_string().into())).await.unwrap();
			}
			let _ = seen_tx.send(frame);
			count += 1;
			if count == frames {
				break;
			}
		}
		let _ = ws.close(None).await;
	});

	(format!("http://{addr}"), seen_rx)
}

async fn next(events: &mut mpsc::UnboundedReceiver<ContextEvent>) -> ContextEvent {
	timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn frames_round_trip_and_server_close_is_reported() {
	let (endpoint, mut seen) = chat_server(1).await;
	let parts = WebSocketConnector.dial(&endpoint).await.unwrap();
	let mut sender = parts.sender;
	let mut inbound = parts.message_rx;
	let reader = tokio::spawn(parts.receiver.run());

	sender
		.send(json!({ "event": "join_room", "data": { "roomId": "lobby", "userId": "u", "displayName": "U" } }))
		.await
		.unwrap();

	let frame = timeout(Duration::from_secs(5), inbound.recv()).await.unwrap().unwrap();
	assert_eq!(frame["event"], "new_message");
	assert_eq!(frame["data"]["roomId"], "lobby");
	assert_eq!(seen.recv().await.unwrap()["event"], "join_room");

	let reason = timeout(Duration::from_secs(5), reader).await.unwrap().unwrap().unwrap();
	assert_eq!(reason, CloseReason::ServerClose);
}

#[tokio::test]
async fn dialing_a_closed_port_fails() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	assert!(WebSocketConnector.dial(&format!("ws://{addr}")).await.is_err());
}

#[tokio::test]
async fn relay_host_joins_and_relays_over_websocket() {
	let (endpoint, mut seen) = chat_server(2).await;
	let (relay, _task) = RelayHost::new(Identity::ephemeral(), ReconnectPolicy::immediate(0), Arc::new(WebSocketConnector)).spawn();
	let tab = ContextId::tab(1);
	let mut events = relay.attach(tab).unwrap();

	relay.command(tab, ContextCommand::Init { endpoint: Some(endpoint) }).unwrap();
	relay.command(tab, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();

	assert_eq!(next(&mut events).await, ContextEvent::Connected);
	let ContextEvent::Message(message) = next(&mut events).await else {
		panic!("expected a chat message");
	};
	assert_eq!(message.display_name, "Server");
	assert_eq!(message.text, "welcome");

	let join = seen.recv().await.unwrap();
	assert_eq!(join["data"]["roomId"], "lobby");
	assert!(join["data"]["userId"].as_str().unwrap().starts_with("user_"));

	relay.command(tab, ContextCommand::SendMessage { text: "hi all".into() }).unwrap();
	let sent = seen.recv().await.unwrap();
	assert_eq!(sent, json!({ "event": "send_message", "data": { "roomId": "lobby", "text": "hi all" } }));

	assert_eq!(next(&mut events).await, ContextEvent::Disconnected { permanent: true });
}
