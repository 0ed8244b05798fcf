//! Error types for the relay runtime.

use tabrelay_protocol::{ContextId, FrameId, RoomId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors produced by the relay, its connection and its collaborators.
///
/// Usage errors (`NotConnected`, `RoomMismatch`, `NotInRoom`, `NestedFrame`)
/// are reported back to the context that caused them and never touch the
/// shared connection.
#[derive(Debug, Error)]
pub enum RelayError {
	#[error("Not connected to chat server")]
	NotConnected,

	#[error("room {requested} is not the connection's current room ({current})", current = .current.as_ref().map(RoomId::as_str).unwrap_or("none"))]
	RoomMismatch { requested: RoomId, current: Option<RoomId> },

	#[error("context {0} has not joined a room")]
	NotInRoom(ContextId),

	#[error("context {0} is a nested frame; route through the top frame's bridge")]
	NestedFrame(ContextId),

	#[error("No backend endpoint configured")]
	NoEndpoint,

	#[error("Backend URL not initialized")]
	EndpointTimeout,

	#[error("transport error: {0}")]
	Transport(String),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("backend error: {0}")]
	Backend(String),

	#[error("relay channel closed")]
	ChannelClosed,

	#[error(transparent)]
	Bridge(#[from] BridgeError),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl RelayError {
	/// `true` for errors caused by the issuing context rather than the connection.
	pub fn is_usage_error(&self) -> bool {
		matches!(
			self,
			RelayError::NotConnected | RelayError::RoomMismatch { .. } | RelayError::NotInRoom(_) | RelayError::NestedFrame(_) | RelayError::NoEndpoint
		)
	}
}

/// Errors routing envelopes through a tab's frame tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
	#[error("bridge already active in this realm")]
	AlreadyActive,

	#[error("unknown frame {0}")]
	UnknownFrame(FrameId),

	#[error("frame {0} is detached from the top frame")]
	Detached(FrameId),

	#[error("frame {frame} cannot move under its own descendant {parent}")]
	Cycle { frame: FrameId, parent: FrameId },

	#[error("frame tree deeper than {0} levels")]
	DepthExceeded(usize),

	#[error("malformed envelope: {0}")]
	Malformed(String),

	#[error("port closed")]
	PortClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		RelayError::Transport(err.to_string())
	}
}
