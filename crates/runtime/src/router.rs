//! Fan-in of context commands and fan-out of service events.
//!
//! [`RelayRouter`] owns the room registry and the connection state machine.
//! Commands from contexts are validated against the registry and turned into
//! connection effects; events from the service and connection lifecycle
//! notices are broadcast to every registered context through a
//! [`ContextSink`]. A context whose delivery fails is pruned and never hears
//! from the relay again.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tabrelay_protocol::{ContextCommand, ContextEvent, ContextId, WireEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, ConnectionManager, Effect, Generation, Lifecycle};
use crate::error::{RelayError, Result};
use crate::lifecycle::{ContextLifecycleTracker, HostNotification};
use crate::registry::RoomRegistry;

/// A context could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context {0} is unreachable")]
pub struct DeliveryError(pub ContextId);

/// Delivery of relay events to contexts.
pub trait ContextSink: Send {
	fn deliver(&mut self, context: ContextId, event: &ContextEvent) -> std::result::Result<(), DeliveryError>;

	/// Drops whatever the sink holds for `context`.
	fn forget(&mut self, context: ContextId);
}

/// [`ContextSink`] backed by one unbounded channel per context.
#[derive(Debug, Default)]
pub struct ChannelSink {
	outlets: HashMap<ContextId, mpsc::UnboundedSender<ContextEvent>>,
}

impl ChannelSink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Routes events for `context` into `outlet`, replacing any previous outlet.
	pub fn attach(&mut self, context: ContextId, outlet: mpsc::UnboundedSender<ContextEvent>) {
		self.outlets.insert(context, outlet);
	}

	pub fn is_attached(&self, context: ContextId) -> bool {
		self.outlets.contains_key(&context)
	}
}

impl ContextSink for ChannelSink {
	fn deliver(&mut self, context: ContextId, event: &ContextEvent) -> std::result::Result<(), DeliveryError> {
		let outlet = self.outlets.get(&context).ok_or(DeliveryError(context))?;
		if outlet.send(event.clone()).is_err() {
			self.outlets.remove(&context);
			return Err(DeliveryError(context));
		}
		Ok(())
	}

	fn forget(&mut self, context: ContextId) {
		self.outlets.remove(&context);
	}
}

/// Translator between contexts and the shared connection.
pub struct RelayRouter<S> {
	registry: RoomRegistry,
	connection: ConnectionManager,
	lifecycle: ContextLifecycleTracker,
	sink: S,
}

impl<S: ContextSink> RelayRouter<S> {
	pub fn new(connection: ConnectionManager, sink: S) -> Self {
		Self {
			registry: RoomRegistry::new(),
			connection,
			lifecycle: ContextLifecycleTracker::new(),
			sink,
		}
	}

	pub fn registry(&self) -> &RoomRegistry {
		&self.registry
	}

	pub fn connection(&self) -> &ConnectionManager {
		&self.connection
	}

	pub fn sink(&self) -> &S {
		&self.sink
	}

	pub fn sink_mut(&mut self) -> &mut S {
		&mut self.sink
	}

	/// Points the connection at `endpoint` without registering any context.
	pub fn configure(&mut self, endpoint: &str) -> Vec<Effect> {
		let effects = self.connection.configure(endpoint);
		self.absorb(effects)
	}

	/// Applies one command from `context`, returning the I/O the caller must perform.
	///
	/// Errors are local to `context`: nothing is transmitted and no other
	/// context is affected.
	pub fn on_context_command(&mut self, context: ContextId, command: ContextCommand) -> Result<Vec<Effect>> {
		if !context.is_top_level() {
			return Err(RelayError::NestedFrame(context));
		}
		debug!(target = "tabrelay.router", context = %context, command = command.name(), "context command");

		match command {
			ContextCommand::Init { endpoint } => {
				if endpoint.is_none() && self.connection.endpoint().is_none() {
					return Err(RelayError::NoEndpoint);
				}
				self.registry.upsert(context, None);
				let mut effects = match endpoint {
					Some(endpoint) => self.configure(&endpoint),
					None => Vec::new(),
				};
				let opened = self.connection.ensure_connected()?;
				effects.extend(self.absorb(opened));
				if self.connection.is_connected() {
					self.deliver(context, &ContextEvent::Connected);
				}
				Ok(effects)
			}
			ContextCommand::JoinRoom { room_id } => {
				info!(target = "tabrelay.router", context = %context, room = %room_id, "joining room");
				self.registry.upsert(context, Some(room_id.clone()));
				let effects = self.connection.send_join(room_id);
				Ok(self.absorb(effects))
			}
			ContextCommand::SendMessage { text } => {
				if !self.connection.is_connected() {
					return Err(RelayError::NotConnected);
				}
				let room = self.registry.get(context).cloned().ok_or(RelayError::NotInRoom(context))?;
				let effects = self.connection.send_outbound(&room, text)?;
				Ok(self.absorb(effects))
			}
		}
	}

	/// Like [`on_context_command`](Self::on_context_command), reporting any
	/// error back to `context` as an [`ContextEvent::Error`].
	pub fn dispatch_command(&mut self, context: ContextId, command: ContextCommand) -> Vec<Effect> {
		match self.on_context_command(context, command) {
			Ok(effects) => effects,
			Err(err) => {
				if err.is_usage_error() {
					debug!(target = "tabrelay.router", context = %context, error = %err, "command rejected");
				} else {
					warn!(target = "tabrelay.router", context = %context, error = %err, "command failed");
				}
				self.deliver(context, &ContextEvent::Error { detail: err.to_string() });
				Vec::new()
			}
		}
	}

	/// Broadcasts one service event to every registered context, regardless of room.
	pub fn on_remote_event(&mut self, event: WireEvent) {
		debug!(target = "tabrelay.router", event = event.name(), "remote event");
		let event = match event {
			WireEvent::NewMessage(message) => ContextEvent::Message(message),
			WireEvent::UserJoined(presence) | WireEvent::UserLeft(presence) => ContextEvent::MemberCount { count: presence.member_count },
			WireEvent::MessageHistory(messages) => ContextEvent::History { messages },
		};
		self.broadcast(&event);
	}

	/// Decodes a raw frame from the link for `generation` and broadcasts it.
	///
	/// Frames from superseded links and frames that are not service events are dropped.
	pub fn on_remote_frame(&mut self, generation: Generation, frame: JsonValue) {
		if generation != self.connection.generation() {
			debug!(target = "tabrelay.router", generation, "dropping frame from stale link");
			return;
		}
		match serde_json::from_value::<WireEvent>(frame) {
			Ok(event) => self.on_remote_event(event),
			Err(err) => warn!(target = "tabrelay.router", error = %err, "ignoring unrecognised frame"),
		}
	}

	/// Re-broadcasts a connection lifecycle notice to every registered context.
	///
	/// Failed dials are only logged; contexts learn about them through the
	/// `Disconnected` notice that ends the retry cycle.
	pub fn on_connection_lifecycle(&mut self, notice: Lifecycle) {
		let event = match notice {
			Lifecycle::Connected => ContextEvent::Connected,
			Lifecycle::Disconnected { reason } => ContextEvent::Disconnected {
				permanent: reason.is_permanent(),
			},
			Lifecycle::ConnectError { detail } => {
				warn!(target = "tabrelay.router", error = %detail, "connection error");
				return;
			}
		};
		self.broadcast(&event);
	}

	pub fn on_link_opened(&mut self, generation: Generation) -> Vec<Effect> {
		let effects = self.connection.on_opened(generation);
		self.absorb(effects)
	}

	pub fn on_link_failed(&mut self, generation: Generation, detail: String) -> Vec<Effect> {
		let effects = self.connection.on_open_failed(generation, detail);
		self.absorb(effects)
	}

	pub fn on_link_closed(&mut self, generation: Generation, reason: CloseReason) -> Vec<Effect> {
		let effects = self.connection.on_closed(generation, reason);
		self.absorb(effects)
	}

	pub fn on_retry_due(&mut self, generation: Generation) -> Vec<Effect> {
		let effects = self.connection.on_retry_due(generation);
		self.absorb(effects)
	}

	/// Closes the shared connection deliberately.
	pub fn disconnect(&mut self) -> Vec<Effect> {
		let effects = self.connection.disconnect();
		self.absorb(effects)
	}

	pub fn on_host_notification(&mut self, notification: HostNotification) {
		self.lifecycle.observe(&mut self.registry, notification);
		if let HostNotification::Removed(context) = notification {
			self.sink.forget(context);
		}
	}

	/// Removes `context` from the registry. Returns `false` if it was not registered.
	pub fn remove_context(&mut self, context: ContextId) -> bool {
		self.sink.forget(context);
		self.registry.remove(context)
	}

	/// Broadcasts the lifecycle notices in `effects` and returns the rest.
	fn absorb(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
		let mut io = Vec::with_capacity(effects.len());
		for effect in effects {
			match effect {
				Effect::Notify(notice) => self.on_connection_lifecycle(notice),
				other => io.push(other),
			}
		}
		io
	}

	fn broadcast(&mut self, event: &ContextEvent) {
		for context in self.registry.list_contexts() {
			self.deliver(context, event);
		}
	}

	fn deliver(&mut self, context: ContextId, event: &ContextEvent) {
		if let Err(err) = self.sink.deliver(context, event) {
			warn!(target = "tabrelay.router", context = %context, event = event.name(), error = %err, "delivery failed, pruning context");
			self.remove_context(context);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use tabrelay_protocol::{ChatMessage, Presence, RoomId, WireCommand};

	use super::*;
	use crate::backoff::ReconnectPolicy;
	use crate::identity::Identity;

	#[derive(Default)]
	struct RecordingSink {
		delivered: Vec<(ContextId, ContextEvent)>,
		unreachable: HashSet<ContextId>,
		forgotten: Vec<ContextId>,
	}

	impl RecordingSink {
		fn events_for(&self, context: ContextId) -> Vec<&ContextEvent> {
			self.delivered.iter().filter(|(c, _)| *c == context).map(|(_, e)| e).collect()
		}
	}

	impl ContextSink for RecordingSink {
		fn deliver(&mut self, context: ContextId, event: &ContextEvent) -> std::result::Result<(), DeliveryError> {
			if self.unreachable.contains(&context) {
				return Err(DeliveryError(context));
			}
			self.delivered.push((context, event.clone()));
			Ok(())
		}

		fn forget(&mut self, context: ContextId) {
			self.forgotten.push(context);
		}
	}

	const A: ContextId = ContextId::tab(1);
	const B: ContextId = ContextId::tab(2);

	fn router() -> RelayRouter<RecordingSink> {
		RelayRouter::new(ConnectionManager::new(Identity::ephemeral(), ReconnectPolicy::immediate(2)), RecordingSink::default())
	}

	fn init(router: &mut RelayRouter<RecordingSink>, context: ContextId) -> Vec<Effect> {
		router
			.on_context_command(
				context,
				ContextCommand::Init {
					endpoint: Some("ws://e1".into()),
				},
			)
			.unwrap()
	}

	fn connected_router() -> RelayRouter<RecordingSink> {
		let mut router = router();
		init(&mut router, A);
		init(&mut router, B);
		let generation = router.connection().generation();
		router.on_link_opened(generation);
		router
	}

	fn message(text: &str) -> WireEvent {
		WireEvent::NewMessage(ChatMessage {
			room_id: Some(RoomId::new("lobby")),
			user_id: "user_x".into(),
			display_name: "Userx".into(),
			text: text.into(),
			timestamp: None,
		})
	}

	fn transmitted(effects: &[Effect]) -> Vec<&WireCommand> {
		effects
			.iter()
			.filter_map(|e| match e {
				Effect::Transmit { command, .. } => Some(command),
				_ => None,
			})
			.collect()
	}

	#[test]
	fn nested_frames_cannot_drive_the_relay() {
		let mut router = router();
		let nested = ContextId::frame(1, 4);
		let err = router.on_context_command(nested, ContextCommand::Init { endpoint: None }).unwrap_err();
		assert!(matches!(err, RelayError::NestedFrame(c) if c == nested));
		assert!(router.registry().is_empty());
	}

	#[test]
	fn init_without_any_endpoint_fails_fast() {
		let mut router = router();
		let err = router.on_context_command(A, ContextCommand::Init { endpoint: None }).unwrap_err();
		assert!(matches!(err, RelayError::NoEndpoint));
		assert!(router.registry().is_empty());

		router.on_remote_event(message("hello"));
		assert!(router.sink().delivered.is_empty());
	}

	#[test]
	fn init_registers_context_and_dials_once() {
		let mut router = router();
		let first = init(&mut router, A);
		let second = init(&mut router, B);

		assert!(matches!(first.as_slice(), [Effect::Open { endpoint, .. }] if endpoint == "ws://e1"));
		assert!(second.is_empty());
		assert_eq!(router.registry().len(), 2);
	}

	#[test]
	fn init_while_connected_greets_only_the_new_context() {
		let mut router = connected_router();
		router.sink_mut().delivered.clear();

		let c = ContextId::tab(3);
		init(&mut router, c);
		assert_eq!(router.sink().events_for(c), vec![&ContextEvent::Connected]);
		assert!(router.sink().events_for(A).is_empty());
	}

	#[test]
	fn init_resets_previous_membership() {
		let mut router = connected_router();
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();
		init(&mut router, A);
		assert_eq!(router.registry().get(A), None);
		assert!(router.registry().contains(A));
	}

	#[test]
	fn send_is_transmitted_only_from_the_current_room() {
		let mut router = connected_router();
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();

		let effects = router.on_context_command(A, ContextCommand::SendMessage { text: "hi".into() }).unwrap();
		assert!(matches!(transmitted(&effects).as_slice(), [WireCommand::SendMessage(send)] if send.text == "hi"));

		let err = router.on_context_command(B, ContextCommand::SendMessage { text: "hi".into() }).unwrap_err();
		assert!(matches!(err, RelayError::NotInRoom(c) if c == B));

		// B moves the shared room, so A's room no longer matches.
		router.on_context_command(B, ContextCommand::JoinRoom { room_id: RoomId::new("den") }).unwrap();
		let err = router.on_context_command(A, ContextCommand::SendMessage { text: "hi".into() }).unwrap_err();
		assert!(matches!(err, RelayError::RoomMismatch { .. }));
	}

	#[test]
	fn send_while_disconnected_reports_not_connected() {
		let mut router = router();
		init(&mut router, A);
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();

		let effects = router.dispatch_command(A, ContextCommand::SendMessage { text: "hi".into() });
		assert!(effects.is_empty());
		assert_eq!(
			router.sink().events_for(A),
			vec![&ContextEvent::Error {
				detail: "Not connected to chat server".into()
			}]
		);
	}

	#[test]
	fn remote_events_reach_every_context_regardless_of_room() {
		let mut router = connected_router();
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();
		router.sink_mut().delivered.clear();

		router.on_remote_event(message("hello"));
		router.on_remote_event(WireEvent::UserJoined(Presence {
			display_name: "Userx".into(),
			member_count: 3,
		}));

		for context in [A, B] {
			let events = router.sink().events_for(context);
			assert!(matches!(events[0], ContextEvent::Message(m) if m.text == "hello"));
			assert_eq!(events[1], &ContextEvent::MemberCount { count: 3 });
		}
	}

	#[test]
	fn failed_delivery_prunes_only_that_context() {
		let mut router = connected_router();
		router.sink_mut().unreachable.insert(A);
		router.sink_mut().delivered.clear();

		router.on_remote_event(message("one"));
		router.on_remote_event(message("two"));

		assert!(!router.registry().contains(A));
		assert_eq!(router.sink().forgotten, vec![A]);
		assert_eq!(router.sink().events_for(B).len(), 2);
	}

	#[test]
	fn removed_context_hears_nothing_further() {
		let mut router = connected_router();
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();
		router.on_context_command(B, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();
		router.sink_mut().delivered.clear();

		router.on_remote_event(message("first"));
		router.on_host_notification(HostNotification::Removed(A));
		router.on_host_notification(HostNotification::Removed(A));
		router.on_remote_event(message("second"));

		assert_eq!(router.sink().events_for(A).len(), 1);
		assert_eq!(router.sink().events_for(B).len(), 2);
	}

	#[test]
	fn lifecycle_notices_are_broadcast() {
		let mut router = router();
		init(&mut router, A);
		init(&mut router, B);
		let generation = router.connection().generation();
		router.on_link_opened(generation);

		for context in [A, B] {
			assert_eq!(router.sink().events_for(context), vec![&ContextEvent::Connected]);
		}

		router.on_link_closed(generation, CloseReason::ServerClose);
		for context in [A, B] {
			assert_eq!(router.sink().events_for(context)[1], &ContextEvent::Disconnected { permanent: true });
		}
	}

	#[test]
	fn failed_redials_surface_only_as_disconnects() {
		let mut router = connected_router();
		router.sink_mut().delivered.clear();
		let generation = router.connection().generation();

		router.on_link_closed(generation, CloseReason::Network("reset".into()));
		let retry = router.connection().generation();
		router.on_retry_due(retry);
		router.on_link_failed(router.connection().generation(), "refused".into());

		for context in [A, B] {
			assert_eq!(router.sink().events_for(context), vec![&ContextEvent::Disconnected { permanent: false }]);
		}

		router.on_retry_due(router.connection().generation());
		router.on_link_failed(router.connection().generation(), "refused".into());
		for context in [A, B] {
			assert_eq!(
				router.sink().events_for(context),
				vec![&ContextEvent::Disconnected { permanent: false }, &ContextEvent::Disconnected { permanent: true }]
			);
		}
	}

	#[test]
	fn permanent_close_makes_later_sends_fail_not_connected() {
		let mut router = connected_router();
		router.on_context_command(A, ContextCommand::JoinRoom { room_id: RoomId::new("lobby") }).unwrap();
		let generation = router.connection().generation();

		let effects = router.on_link_closed(generation, CloseReason::ServerClose);
		assert!(effects.is_empty());
		assert_eq!(router.connection().current_room(), None);

		for context in [A, B] {
			let err = router.on_context_command(context, ContextCommand::SendMessage { text: "hi".into() }).unwrap_err();
			assert!(matches!(err, RelayError::NotConnected));
		}
	}

	#[test]
	fn frames_from_stale_links_are_dropped() {
		let mut router = connected_router();
		let stale = router.connection().generation();
		router.on_context_command(A, ContextCommand::Init { endpoint: Some("ws://e2".into()) }).unwrap();
		router.sink_mut().delivered.clear();

		let frame = serde_json::to_value(message("late")).unwrap();
		router.on_remote_frame(stale, frame);
		router.on_remote_frame(router.connection().generation(), serde_json::json!({ "event": "mystery" }));
		assert!(router.sink().delivered.is_empty());
	}
}
