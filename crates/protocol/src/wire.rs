//! Frames exchanged with the remote chat service.
//!
//! Every frame is a JSON text message of the form:
//!
//! ```json
//! { "event": "join_room", "data": { "roomId": "lobby", "userId": "user_x", "displayName": "Userx" } }
//! ```
//!
//! Older deployments of the service use `username`, `userCount` and `message`
//! for what is called `displayName`, `memberCount` and `text` here; both
//! spellings are accepted on input.

use serde::{Deserialize, Serialize};

use crate::ids::RoomId;

/// Frames the relay sends to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WireCommand {
	JoinRoom(JoinRoom),
	SendMessage(SendMessage),
}

impl WireCommand {
	pub fn name(&self) -> &'static str {
		match self {
			WireCommand::JoinRoom(_) => "join_room",
			WireCommand::SendMessage(_) => "send_message",
		}
	}

	pub fn room_id(&self) -> &RoomId {
		match self {
			WireCommand::JoinRoom(join) => &join.room_id,
			WireCommand::SendMessage(send) => &send.room_id,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
	pub room_id: RoomId,
	pub user_id: String,
	#[serde(alias = "username")]
	pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
	pub room_id: RoomId,
	#[serde(alias = "message")]
	pub text: String,
}

/// Frames the service pushes to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WireEvent {
	NewMessage(ChatMessage),
	UserJoined(Presence),
	UserLeft(Presence),
	MessageHistory(Vec<ChatMessage>),
}

impl WireEvent {
	pub fn name(&self) -> &'static str {
		match self {
			WireEvent::NewMessage(_) => "new_message",
			WireEvent::UserJoined(_) => "user_joined",
			WireEvent::UserLeft(_) => "user_left",
			WireEvent::MessageHistory(_) => "message_history",
		}
	}
}

/// One chat message as recorded by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub room_id: Option<RoomId>,
	#[serde(default)]
	pub user_id: String,
	#[serde(alias = "username")]
	pub display_name: String,
	#[serde(alias = "message")]
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<Timestamp>,
}

/// Service timestamps arrive either as epoch milliseconds or as a formatted string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
	Millis(u64),
	Text(String),
}

/// Membership change reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
	#[serde(alias = "username")]
	pub display_name: String,
	#[serde(alias = "userCount")]
	pub member_count: u32,
}
