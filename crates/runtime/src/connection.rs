//! Lifecycle of the single shared connection to the chat service.
//!
//! [`ConnectionManager`] is a state machine with no I/O of its own. Every
//! operation returns the [`Effect`]s the caller must carry out (dial, transmit,
//! close, arm a retry timer) together with [`Lifecycle`] notices for the
//! router. The relay host executes the effects and feeds completions back in,
//! tagged with the [`Generation`] they belong to so that results from a
//! connection that has since been torn down are ignored.
//!
//! ```text
//!  Disconnected --open--> Connecting --ok--> Connected --server/client close--> Disconnected
//!                              |                 |
//!                           failed          network drop
//!                              v                 v
//!                         Reconnecting <---------+ --ok--> Connected (rejoins current room)
//!                              |
//!                     retries exhausted --> Failed
//! ```

use std::fmt;
use std::time::Duration;

use tabrelay_protocol::{JoinRoom, RoomId, SendMessage, WireCommand};
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::error::{RelayError, Result};
use crate::identity::Identity;

/// Monotonic id of one dial attempt. Completions carrying an older generation are stale.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	Reconnecting { attempt: u32 },
	Failed,
}

impl ConnectionState {
	/// `true` while a link exists or is being established.
	pub fn is_live(&self) -> bool {
		matches!(self, ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting { .. })
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectionState::Disconnected => f.write_str("disconnected"),
			ConnectionState::Connecting => f.write_str("connecting"),
			ConnectionState::Connected => f.write_str("connected"),
			ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
			ConnectionState::Failed => f.write_str("failed"),
		}
	}
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
	/// The service closed the connection deliberately.
	ServerClose,
	/// This side closed the connection deliberately.
	ClientClose,
	/// The endpoint was reconfigured.
	EndpointChanged,
	/// The reconnect ceiling was reached.
	RetriesExhausted,
	/// The link dropped without a close handshake.
	Network(String),
}

impl CloseReason {
	/// Permanent closes clear room state and are not retried.
	pub fn is_permanent(&self) -> bool {
		!matches!(self, CloseReason::Network(_))
	}
}

/// Notices for consumers of the connection. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
	Connected,
	Disconnected { reason: CloseReason },
	ConnectError { detail: String },
}

/// Work the caller must perform on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
	Open { generation: Generation, endpoint: String },
	Transmit { generation: Generation, command: WireCommand },
	Close { generation: Generation },
	ScheduleRetry { generation: Generation, attempt: u32, delay: Duration },
	Notify(Lifecycle),
}

/// Owner of the shared connection's state.
#[derive(Debug)]
pub struct ConnectionManager {
	identity: Identity,
	endpoint: Option<String>,
	state: ConnectionState,
	current_room: Option<RoomId>,
	backoff: Backoff,
	generation: Generation,
}

impl ConnectionManager {
	pub fn new(identity: Identity, policy: ReconnectPolicy) -> Self {
		Self {
			identity,
			endpoint: None,
			state: ConnectionState::Disconnected,
			current_room: None,
			backoff: Backoff::new(policy),
			generation: 0,
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}

	pub fn is_connected(&self) -> bool {
		self.state == ConnectionState::Connected
	}

	pub fn current_room(&self) -> Option<&RoomId> {
		self.current_room.as_ref()
	}

	pub fn endpoint(&self) -> Option<&str> {
		self.endpoint.as_deref()
	}

	pub fn generation(&self) -> Generation {
		self.generation
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn attempts(&self) -> u32 {
		self.backoff.attempts()
	}

	/// Points the connection at `endpoint`.
	///
	/// A different endpoint tears down whatever link exists; the caller follows
	/// up with [`ensure_connected`](Self::ensure_connected) to dial the new one.
	pub fn configure(&mut self, endpoint: &str) -> Vec<Effect> {
		if self.endpoint.as_deref() == Some(endpoint) {
			return Vec::new();
		}

		info!(target = "tabrelay.connection", endpoint, previous = ?self.endpoint, "endpoint configured");
		self.endpoint = Some(endpoint.to_string());
		self.teardown(CloseReason::EndpointChanged)
	}

	/// Dials the configured endpoint unless a link exists or is being established.
	pub fn ensure_connected(&mut self) -> Result<Vec<Effect>> {
		match self.state {
			ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => Ok(Vec::new()),
			ConnectionState::Disconnected | ConnectionState::Failed => {
				let endpoint = self.endpoint.clone().ok_or(RelayError::NoEndpoint)?;
				self.backoff.reset();
				self.state = ConnectionState::Connecting;
				Ok(vec![self.open(endpoint)])
			}
		}
	}

	/// Closes the connection deliberately. Room state is cleared and nothing reconnects.
	pub fn disconnect(&mut self) -> Vec<Effect> {
		let effects = self.teardown(CloseReason::ClientClose);
		self.current_room = None;
		effects
	}

	/// Records `room` as the room to be in, joining now if connected and on the
	/// next transition to `Connected` otherwise.
	pub fn send_join(&mut self, room: RoomId) -> Vec<Effect> {
		self.current_room = Some(room.clone());
		if !self.is_connected() {
			debug!(target = "tabrelay.connection", room = %room, state = ?self.state, "join deferred until connected");
			return Vec::new();
		}
		vec![self.join_effect(room)]
	}

	/// Transmits `text` to `room`, which must be the current room of a connected link.
	pub fn send_outbound(&mut self, room: &RoomId, text: String) -> Result<Vec<Effect>> {
		if !self.is_connected() {
			return Err(RelayError::NotConnected);
		}
		if self.current_room.as_ref() != Some(room) {
			return Err(RelayError::RoomMismatch {
				requested: room.clone(),
				current: self.current_room.clone(),
			});
		}
		Ok(vec![Effect::Transmit {
			generation: self.generation,
			command: WireCommand::SendMessage(SendMessage { room_id: room.clone(), text }),
		}])
	}

	/// The dial for `generation` succeeded.
	pub fn on_opened(&mut self, generation: Generation) -> Vec<Effect> {
		if generation != self.generation || !matches!(self.state, ConnectionState::Connecting | ConnectionState::Reconnecting { .. }) {
			debug!(target = "tabrelay.connection", generation, current = self.generation, "closing stale link");
			return vec![Effect::Close { generation }];
		}

		let reconnected = matches!(self.state, ConnectionState::Reconnecting { .. });
		self.state = ConnectionState::Connected;
		self.backoff.reset();
		info!(target = "tabrelay.connection", generation, reconnected, "connected");

		let mut effects = vec![Effect::Notify(Lifecycle::Connected)];
		if let Some(room) = self.current_room.clone() {
			info!(target = "tabrelay.connection", room = %room, "joining current room");
			effects.push(self.join_effect(room));
		}
		effects
	}

	/// The dial for `generation` failed.
	pub fn on_open_failed(&mut self, generation: Generation, detail: String) -> Vec<Effect> {
		if generation != self.generation || !matches!(self.state, ConnectionState::Connecting | ConnectionState::Reconnecting { .. }) {
			return Vec::new();
		}
		warn!(target = "tabrelay.connection", generation, error = %detail, "connection attempt failed");
		let mut effects = vec![Effect::Notify(Lifecycle::ConnectError { detail })];
		effects.extend(self.retry_or_fail());
		effects
	}

	/// The retry timer armed for `generation` fired.
	pub fn on_retry_due(&mut self, generation: Generation) -> Vec<Effect> {
		if generation != self.generation {
			return Vec::new();
		}
		let ConnectionState::Reconnecting { attempt } = self.state else {
			return Vec::new();
		};
		let Some(endpoint) = self.endpoint.clone() else {
			return self.fail();
		};
		info!(target = "tabrelay.connection", attempt, "reconnection attempt");
		vec![self.open(endpoint)]
	}

	/// The link for `generation` closed.
	pub fn on_closed(&mut self, generation: Generation, reason: CloseReason) -> Vec<Effect> {
		if generation != self.generation || self.state != ConnectionState::Connected {
			return Vec::new();
		}

		info!(target = "tabrelay.connection", generation, reason = ?reason, "disconnected");
		if reason.is_permanent() {
			self.state = ConnectionState::Disconnected;
			self.current_room = None;
			self.generation += 1;
			return vec![Effect::Notify(Lifecycle::Disconnected { reason })];
		}

		let mut effects = vec![Effect::Notify(Lifecycle::Disconnected { reason })];
		effects.extend(self.retry_or_fail());
		effects
	}

	fn open(&mut self, endpoint: String) -> Effect {
		self.generation += 1;
		debug!(target = "tabrelay.connection", generation = self.generation, endpoint = %endpoint, "dialing");
		Effect::Open {
			generation: self.generation,
			endpoint,
		}
	}

	fn join_effect(&self, room: RoomId) -> Effect {
		Effect::Transmit {
			generation: self.generation,
			command: WireCommand::JoinRoom(JoinRoom {
				room_id: room,
				user_id: self.identity.user_id().to_string(),
				display_name: self.identity.display_name().to_string(),
			}),
		}
	}

	fn retry_or_fail(&mut self) -> Vec<Effect> {
		match self.backoff.next_attempt() {
			Some((attempt, delay)) => {
				self.state = ConnectionState::Reconnecting { attempt };
				vec![Effect::ScheduleRetry {
					generation: self.generation,
					attempt,
					delay,
				}]
			}
			None => self.fail(),
		}
	}

	fn fail(&mut self) -> Vec<Effect> {
		warn!(target = "tabrelay.connection", attempts = self.backoff.attempts(), "reconnection failed after max attempts");
		self.state = ConnectionState::Failed;
		self.current_room = None;
		self.generation += 1;
		vec![Effect::Notify(Lifecycle::Disconnected {
			reason: CloseReason::RetriesExhausted,
		})]
	}

	fn teardown(&mut self, reason: CloseReason) -> Vec<Effect> {
		if !self.state.is_live() {
			return Vec::new();
		}

		let was_announced = matches!(self.state, ConnectionState::Connected | ConnectionState::Reconnecting { .. });
		let mut effects = vec![Effect::Close { generation: self.generation }];
		self.generation += 1;
		self.state = ConnectionState::Disconnected;
		self.current_room = None;
		if was_announced {
			effects.push(Effect::Notify(Lifecycle::Disconnected { reason }));
		}
		effects
	}
}
