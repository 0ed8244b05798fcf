//! Envelopes posted between frames of one tab.
//!
//! Frames share no memory, so every envelope travels as a serialized JSON
//! string. Requests travel up to the top frame; responses, relay events and
//! readiness announcements are broadcast to the whole tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
	ContractCall {
		payload: ContractCall,
	},
	ContractResponse(ContractResponse),
	BridgeReady {
		/// Epoch milliseconds at which the announcement was made.
		timestamp: u64,
	},
	/// An event the relay delivered to the tab, repeated to every frame.
	RelayEvent {
		event: ContextEvent,
	},
}

impl BridgeMessage {
	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	pub fn from_json(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}
}

/// A call addressed to the application `target_id` running in the tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
	#[serde(alias = "inscriptionId")]
	pub target_id: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	/// Echoed back in the response when the caller supplies one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractResponse {
	#[serde(alias = "inscriptionId")]
	pub target_id: String,
	#[serde(default)]
	pub result: Value,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub call_id: Option<String>,
}

impl ContractResponse {
	pub fn ok(call: &ContractCall, result: Value) -> Self {
		Self {
			target_id: call.target_id.clone(),
			result,
			error: None,
			call_id: call.call_id.clone(),
		}
	}

	pub fn err(call: &ContractCall, error: impl Into<String>) -> Self {
		Self {
			target_id: call.target_id.clone(),
			result: Value::Null,
			error: Some(error.into()),
			call_id: call.call_id.clone(),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn call_envelope_shape() {
		let raw = r#"{"type":"ContractCall","payload":{"targetId":"cinema-player","method":"listMedia"}}"#;
		let msg = BridgeMessage::from_json(raw).unwrap();
		let BridgeMessage::ContractCall { payload } = msg else {
			panic!("expected call");
		};
		assert_eq!(payload.target_id, "cinema-player");
		assert_eq!(payload.method, "listMedia");
		assert_eq!(payload.params, Value::Null);
	}

	#[test]
	fn response_envelope_is_flat() {
		let call = ContractCall {
			target_id: "cinema-player".into(),
			method: "getMedia".into(),
			params: json!({ "mediaId": "m1" }),
			call_id: Some("c-1".into()),
		};
		let msg = BridgeMessage::ContractResponse(ContractResponse::err(&call, "Unknown method: x"));
		assert_eq!(
			serde_json::to_value(&msg).unwrap(),
			json!({
				"type": "ContractResponse",
				"targetId": "cinema-player",
				"result": null,
				"error": "Unknown method: x",
				"callId": "c-1"
			})
		);
	}

	#[test]
	fn relay_events_nest_the_context_event() {
		let msg = BridgeMessage::RelayEvent {
			event: ContextEvent::MemberCount { count: 4 },
		};
		assert_eq!(
			serde_json::to_value(&msg).unwrap(),
			json!({ "type": "RelayEvent", "event": { "type": "member_count", "count": 4 } })
		);
	}

	#[test]
	fn ready_announcement_round_trips_through_text() {
		let msg = BridgeMessage::BridgeReady { timestamp: 42 };
		let raw = msg.to_json().unwrap();
		assert_eq!(raw, r#"{"type":"BridgeReady","timestamp":42}"#);
		assert_eq!(BridgeMessage::from_json(&raw).unwrap(), msg);
	}
}
