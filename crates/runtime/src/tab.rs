//! One tab's end of the relay.
//!
//! A [`TabSession`] runs in a tab's top frame. It registers the tab with the
//! [`RelayHost`](crate::host::RelayHost) as a single context, serves contract
//! calls arriving from any frame of the tab through [`FrameBridge`] and
//! [`ContractDispatcher`], and repeats every event the relay delivers to the
//! whole frame tree as a [`BridgeMessage::RelayEvent`].

use std::sync::Arc;

use tabrelay_protocol::{BridgeMessage, ContextCommand, ContextEvent, ContextId, ContractResponse, FrameId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::{FrameBridge, FrameMutation, FramePort, Realm};
use crate::config::RelayConfig;
use crate::contract::{ContractDispatcher, EndpointSlot};
use crate::error::{RelayError, Result};
use crate::host::RelayHandle;
use crate::lifecycle::HostNotification;
use crate::media::{MediaCache, MediaCatalog};

enum TabInput {
	Posted { origin: FrameId, raw: String },
	Answered(ContractResponse),
	Mutations(Vec<FrameMutation>),
	Endpoint(String),
	Invalidated,
	Reloading,
	Closed,
}

/// Cloneable handle for feeding a running [`TabSession`].
#[derive(Clone)]
pub struct TabHandle {
	inbox: mpsc::UnboundedSender<TabInput>,
}

impl TabHandle {
	/// Hands over an envelope a frame of the tab posted.
	pub fn post(&self, origin: FrameId, raw: impl Into<String>) -> Result<()> {
		self.send(TabInput::Posted { origin, raw: raw.into() })
	}

	pub fn observe(&self, mutations: Vec<FrameMutation>) -> Result<()> {
		self.send(TabInput::Mutations(mutations))
	}

	/// Supplies the backend endpoint and re-registers the tab against it.
	pub fn set_endpoint(&self, endpoint: impl Into<String>) -> Result<()> {
		self.send(TabInput::Endpoint(endpoint.into()))
	}

	/// The hosting extension was reloaded; later calls are refused.
	pub fn invalidate(&self) -> Result<()> {
		self.send(TabInput::Invalidated)
	}

	/// The tab is navigating away. The session ends.
	pub fn reload(&self) -> Result<()> {
		self.send(TabInput::Reloading)
	}

	/// The tab was closed. The session ends.
	pub fn close(&self) -> Result<()> {
		self.send(TabInput::Closed)
	}

	fn send(&self, input: TabInput) -> Result<()> {
		self.inbox.send(input).map_err(|_| RelayError::ChannelClosed)
	}
}

/// Frame bridge, contract dispatcher and relay registration of one tab.
pub struct TabSession {
	context: ContextId,
	relay: RelayHandle,
	bridge: FrameBridge,
	dispatcher: Arc<ContractDispatcher>,
	endpoint: Arc<EndpointSlot>,
	events: mpsc::UnboundedReceiver<ContextEvent>,
	inbox_tx: mpsc::UnboundedSender<TabInput>,
	inbox_rx: mpsc::UnboundedReceiver<TabInput>,
}

impl TabSession {
	/// Installs the bridge in `realm` and registers tab `tab` with the relay.
	///
	/// The application id, frame depth limit, endpoint and endpoint wait come
	/// from `config`. Fails if a bridge is already active in `realm`.
	pub fn open(
		config: &RelayConfig,
		relay: RelayHandle,
		tab: u32,
		realm: &Realm,
		top: Box<dyn FramePort>,
		catalog: Arc<dyn MediaCatalog>,
		cache: Arc<dyn MediaCache>,
	) -> Result<Self> {
		let bridge = FrameBridge::install(realm, config.app_id.clone(), config.bridge_max_depth, top)?;
		let context = ContextId::tab(tab);
		let events = relay.attach(context)?;

		let endpoint = Arc::new(EndpointSlot::new(config.endpoint.clone()));
		let dispatcher = ContractDispatcher::new(config.app_id.clone(), catalog, cache, Arc::clone(&endpoint))
			.with_endpoint_wait(config.endpoint_wait())
			.with_relay(relay.clone(), context);

		relay.command(
			context,
			ContextCommand::Init {
				endpoint: config.endpoint.clone(),
			},
		)?;
		info!(target = "tabrelay.tab", context = %context, app_id = %config.app_id, "tab session opened");

		let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
		Ok(Self {
			context,
			relay,
			bridge,
			dispatcher: Arc::new(dispatcher),
			endpoint,
			events,
			inbox_tx,
			inbox_rx,
		})
	}

	/// Sets the port of the page embedding this tab.
	pub fn with_embedder(mut self, port: Box<dyn FramePort>) -> Self {
		self.bridge = self.bridge.with_embedder(port);
		self
	}

	pub fn context(&self) -> ContextId {
		self.context
	}

	pub fn handle(&self) -> TabHandle {
		TabHandle {
			inbox: self.inbox_tx.clone(),
		}
	}

	pub fn spawn(self) -> (TabHandle, JoinHandle<()>) {
		let handle = self.handle();
		let task = tokio::spawn(self.run());
		(handle, task)
	}

	/// Processes frame input and relay events until the tab goes away.
	pub async fn run(mut self) {
		loop {
			tokio::select! {
				Some(event) = self.events.recv() => self.on_relay_event(event),
				Some(input) = self.inbox_rx.recv() => {
					if !self.handle_input(input) {
						break;
					}
				}
				else => break,
			}
		}
		debug!(target = "tabrelay.tab", context = %self.context, "tab session ended");
	}

	fn handle_input(&mut self, input: TabInput) -> bool {
		match input {
			TabInput::Posted { origin, raw } => self.on_posted(origin, &raw),
			TabInput::Answered(response) => {
				if let Err(err) = self.bridge.respond(response) {
					warn!(target = "tabrelay.tab", error = %err, "cannot broadcast response");
				}
			}
			TabInput::Mutations(mutations) => {
				self.bridge.observe(mutations);
			}
			TabInput::Endpoint(endpoint) => {
				self.endpoint.set(endpoint.clone());
				let init = ContextCommand::Init { endpoint: Some(endpoint) };
				if let Err(err) = self.relay.command(self.context, init) {
					warn!(target = "tabrelay.tab", error = %err, "relay unavailable");
				}
			}
			TabInput::Invalidated => self.dispatcher.invalidate(),
			TabInput::Reloading => {
				self.leave(HostNotification::Reloading(self.context));
				return false;
			}
			TabInput::Closed => {
				self.leave(HostNotification::Removed(self.context));
				return false;
			}
		}
		true
	}

	/// Serves a call that reached the top frame. The answer is broadcast once
	/// the dispatcher resolves it, without holding up relay events.
	fn on_posted(&self, origin: FrameId, raw: &str) {
		let call = match self.bridge.relay_call(origin, raw) {
			Ok(Some(call)) => call,
			Ok(None) => return,
			Err(err) => {
				debug!(target = "tabrelay.tab", %origin, error = %err, "dropping envelope");
				return;
			}
		};

		let dispatcher = Arc::clone(&self.dispatcher);
		let inbox = self.inbox_tx.clone();
		tokio::spawn(async move {
			if let Some(response) = dispatcher.handle(&call).await {
				let _ = inbox.send(TabInput::Answered(response));
			}
		});
	}

	fn on_relay_event(&self, event: ContextEvent) {
		let name = event.name();
		match self.bridge.broadcast(&BridgeMessage::RelayEvent { event }) {
			Ok(delivered) => debug!(target = "tabrelay.tab", event = name, delivered, "relay event repeated to frames"),
			Err(err) => warn!(target = "tabrelay.tab", event = name, error = %err, "cannot repeat relay event"),
		}
	}

	fn leave(&self, notification: HostNotification) {
		info!(target = "tabrelay.tab", context = %self.context, ?notification, "tab session closing");
		if let Err(err) = self.relay.notify(notification) {
			debug!(target = "tabrelay.tab", error = %err, "relay already stopped");
		}
	}
}
