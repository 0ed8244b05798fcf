//! The relay's single event loop.
//!
//! [`RelayHost`] owns the [`RelayRouter`] and is the only place relay state is
//! mutated. Contexts, the host environment and the network all talk to it by
//! posting [`HostInput`]s to its inbox; it applies each input to the router and
//! carries out the resulting [`Effect`]s by spawning small I/O tasks that post
//! their completions back to the same inbox.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tabrelay_protocol::{ContextCommand, ContextEvent, ContextId, RoomId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::connection::{CloseReason, ConnectionManager, ConnectionState, Effect, Generation};
use crate::error::{RelayError, Result};
use crate::identity::Identity;
use crate::lifecycle::HostNotification;
use crate::router::{ChannelSink, RelayRouter};
use crate::transport::{Connector, Transport, TransportParts};

/// Messages processed by the host loop.
enum HostInput {
	Attach {
		context: ContextId,
		outlet: mpsc::UnboundedSender<ContextEvent>,
	},
	Command {
		context: ContextId,
		command: ContextCommand,
	},
	Host(HostNotification),
	LinkOpened {
		generation: Generation,
		parts: TransportParts,
	},
	LinkFailed {
		generation: Generation,
		detail: String,
	},
	LinkFrame {
		generation: Generation,
		frame: JsonValue,
	},
	LinkClosed {
		generation: Generation,
		reason: CloseReason,
	},
	RetryDue {
		generation: Generation,
	},
	Snapshot(oneshot::Sender<RelaySnapshot>),
	Shutdown,
}

/// Point-in-time view of the relay's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySnapshot {
	pub state: ConnectionState,
	pub endpoint: Option<String>,
	pub current_room: Option<RoomId>,
	pub contexts: Vec<(ContextId, Option<RoomId>)>,
}

/// Cloneable handle for posting to a running [`RelayHost`].
#[derive(Clone)]
pub struct RelayHandle {
	inbox: mpsc::UnboundedSender<HostInput>,
}

impl RelayHandle {
	/// Opens the event channel for `context`. Events arrive once the context sends `Init`.
	pub fn attach(&self, context: ContextId) -> Result<mpsc::UnboundedReceiver<ContextEvent>> {
		let (outlet, events) = mpsc::unbounded_channel();
		self.post(HostInput::Attach { context, outlet })?;
		Ok(events)
	}

	pub fn command(&self, context: ContextId, command: ContextCommand) -> Result<()> {
		self.post(HostInput::Command { context, command })
	}

	pub fn notify(&self, notification: HostNotification) -> Result<()> {
		self.post(HostInput::Host(notification))
	}

	pub async fn snapshot(&self) -> Result<RelaySnapshot> {
		let (tx, rx) = oneshot::channel();
		self.post(HostInput::Snapshot(tx))?;
		rx.await.map_err(|_| RelayError::ChannelClosed)
	}

	/// Disconnects and stops the host loop.
	pub fn shutdown(&self) -> Result<()> {
		self.post(HostInput::Shutdown)
	}

	fn post(&self, input: HostInput) -> Result<()> {
		self.inbox.send(input).map_err(|_| RelayError::ChannelClosed)
	}
}

struct ActiveLink {
	generation: Generation,
	outbound: mpsc::UnboundedSender<JsonValue>,
	reader: JoinHandle<()>,
}

/// Event loop owning the relay's state.
pub struct RelayHost {
	router: RelayRouter<ChannelSink>,
	connector: Arc<dyn Connector>,
	inbox_tx: mpsc::UnboundedSender<HostInput>,
	inbox_rx: mpsc::UnboundedReceiver<HostInput>,
	link: Option<ActiveLink>,
}

impl RelayHost {
	pub fn new(identity: Identity, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
		let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
		Self {
			router: RelayRouter::new(ConnectionManager::new(identity, policy), ChannelSink::new()),
			connector,
			inbox_tx,
			inbox_rx,
			link: None,
		}
	}

	/// Presets the endpoint used when a context sends `Init` without one.
	pub fn with_endpoint(mut self, endpoint: Option<&str>) -> Self {
		if let Some(endpoint) = endpoint {
			self.router.configure(endpoint);
		}
		self
	}

	pub fn handle(&self) -> RelayHandle {
		RelayHandle {
			inbox: self.inbox_tx.clone(),
		}
	}

	/// Spawns the loop onto the current runtime.
	pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
		let handle = self.handle();
		let task = tokio::spawn(self.run());
		(handle, task)
	}

	/// Processes inputs until shutdown.
	pub async fn run(mut self) {
		info!(target = "tabrelay.host", "relay host started");
		while let Some(input) = self.inbox_rx.recv().await {
			if !self.handle_input(input) {
				break;
			}
		}
		info!(target = "tabrelay.host", "relay host stopped");
	}

	fn handle_input(&mut self, input: HostInput) -> bool {
		let effects = match input {
			HostInput::Attach { context, outlet } => {
				debug!(target = "tabrelay.host", context = %context, "context attached");
				self.router.sink_mut().attach(context, outlet);
				Vec::new()
			}
			HostInput::Command { context, command } => self.router.dispatch_command(context, command),
			HostInput::Host(notification) => {
				self.router.on_host_notification(notification);
				Vec::new()
			}
			HostInput::LinkOpened { generation, parts } => {
				self.install_link(generation, parts);
				self.router.on_link_opened(generation)
			}
			HostInput::LinkFailed { generation, detail } => self.router.on_link_failed(generation, detail),
			HostInput::LinkFrame { generation, frame } => {
				self.router.on_remote_frame(generation, frame);
				Vec::new()
			}
			HostInput::LinkClosed { generation, reason } => {
				if self.link.as_ref().is_some_and(|link| link.generation == generation) {
					self.link = None;
				}
				self.router.on_link_closed(generation, reason)
			}
			HostInput::RetryDue { generation } => self.router.on_retry_due(generation),
			HostInput::Snapshot(reply) => {
				let _ = reply.send(self.snapshot());
				Vec::new()
			}
			HostInput::Shutdown => {
				let effects = self.router.disconnect();
				self.execute(effects);
				self.close_link();
				return false;
			}
		};
		self.execute(effects);
		true
	}

	fn snapshot(&self) -> RelaySnapshot {
		let connection = self.router.connection();
		let registry = self.router.registry();
		let mut contexts: Vec<_> = registry
			.list_contexts()
			.into_iter()
			.map(|context| (context, registry.get(context).cloned()))
			.collect();
		contexts.sort_by_key(|(context, _)| *context);
		RelaySnapshot {
			state: connection.state(),
			endpoint: connection.endpoint().map(str::to_string),
			current_room: connection.current_room().cloned(),
			contexts,
		}
	}

	fn execute(&mut self, effects: Vec<Effect>) {
		for effect in effects {
			match effect {
				Effect::Open { generation, endpoint } => self.dial(generation, endpoint),
				Effect::Transmit { generation, command } => {
					let Some(link) = self.link.as_ref().filter(|link| link.generation == generation) else {
						debug!(target = "tabrelay.host", generation, command = command.name(), "no link for transmit");
						continue;
					};
					match serde_json::to_value(&command) {
						Ok(frame) => {
							if link.outbound.send(frame).is_err() {
								warn!(target = "tabrelay.host", generation, "link writer gone");
							}
						}
						Err(err) => warn!(target = "tabrelay.host", error = %err, "failed to encode command"),
					}
				}
				Effect::Close { generation } => {
					if self.link.as_ref().is_some_and(|link| link.generation == generation) {
						self.close_link();
					}
				}
				Effect::ScheduleRetry { generation, attempt, delay } => {
					debug!(target = "tabrelay.host", generation, attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
					let inbox = self.inbox_tx.clone();
					tokio::spawn(async move {
						tokio::time::sleep(delay).await;
						let _ = inbox.send(HostInput::RetryDue { generation });
					});
				}
				Effect::Notify(notice) => self.router.on_connection_lifecycle(notice),
			}
		}
	}

	fn dial(&self, generation: Generation, endpoint: String) {
		let connector = Arc::clone(&self.connector);
		let inbox = self.inbox_tx.clone();
		tokio::spawn(async move {
			let input = match connector.dial(&endpoint).await {
				Ok(parts) => HostInput::LinkOpened { generation, parts },
				Err(err) => HostInput::LinkFailed {
					generation,
					detail: err.to_string(),
				},
			};
			let _ = inbox.send(input);
		});
	}

	/// Starts the writer and reader tasks for a freshly opened link. Links
	/// that were superseded while dialing are closed straight away.
	fn install_link(&mut self, generation: Generation, parts: TransportParts) {
		let TransportParts {
			sender,
			receiver,
			mut message_rx,
		} = parts;

		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		tokio::spawn(write_link(generation, sender, outbound_rx));
		if generation != self.router.connection().generation() {
			debug!(target = "tabrelay.host", generation, "discarding superseded link");
			return;
		}

		let inbox = self.inbox_tx.clone();
		let reader = tokio::spawn(async move {
			let mut run = receiver.run();
			let result = loop {
				tokio::select! {
					biased;
					Some(frame) = message_rx.recv() => {
						let _ = inbox.send(HostInput::LinkFrame { generation, frame });
					}
					result = &mut run => break result,
				}
			};
			while let Ok(frame) = message_rx.try_recv() {
				let _ = inbox.send(HostInput::LinkFrame { generation, frame });
			}
			let reason = result.unwrap_or_else(|err| CloseReason::Network(err.to_string()));
			let _ = inbox.send(HostInput::LinkClosed { generation, reason });
		});

		self.close_link();
		self.link = Some(ActiveLink {
			generation,
			outbound,
			reader,
		});
	}

	/// Drops the active link: the writer flushes and closes, the reader stops.
	fn close_link(&mut self) {
		if let Some(link) = self.link.take() {
			debug!(target = "tabrelay.host", generation = link.generation, "closing link");
			link.reader.abort();
		}
	}
}

async fn write_link(generation: Generation, mut sender: Box<dyn Transport>, mut outbound: mpsc::UnboundedReceiver<JsonValue>) {
	while let Some(frame) = outbound.recv().await {
		if let Err(err) = sender.send(frame).await {
			warn!(target = "tabrelay.host", generation, error = %err, "send failed");
		}
	}
	if let Err(err) = sender.close().await {
		debug!(target = "tabrelay.host", generation, error = %err, "close failed");
	}
}
