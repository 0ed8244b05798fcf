//! Messages between an execution context and the relay.

use serde::{Deserialize, Serialize};

use crate::ids::RoomId;
use crate::wire::ChatMessage;

/// Commands a context sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextCommand {
	/// Register the context and make sure the shared connection is up.
	///
	/// `endpoint` replaces the configured endpoint when present and different.
	Init {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		endpoint: Option<String>,
	},
	JoinRoom {
		#[serde(rename = "roomId")]
		room_id: RoomId,
	},
	SendMessage {
		#[serde(alias = "message")]
		text: String,
	},
}

impl ContextCommand {
	pub fn name(&self) -> &'static str {
		match self {
			ContextCommand::Init { .. } => "init",
			ContextCommand::JoinRoom { .. } => "join_room",
			ContextCommand::SendMessage { .. } => "send_message",
		}
	}
}

/// Events the relay delivers to a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEvent {
	Connected,
	Disconnected {
		/// `true` when the relay will not reconnect on its own.
		#[serde(default)]
		permanent: bool,
	},
	Message(ChatMessage),
	MemberCount {
		count: u32,
	},
	History {
		messages: Vec<ChatMessage>,
	},
	Error {
		detail: String,
	},
}

impl ContextEvent {
	pub fn name(&self) -> &'static str {
		match self {
			ContextEvent::Connected => "connected",
			ContextEvent::Disconnected { .. } => "disconnected",
			ContextEvent::Message(_) => "message",
			ContextEvent::MemberCount { .. } => "member_count",
			ContextEvent::History { .. } => "history",
			ContextEvent::Error { .. } => "error",
		}
	}
}
