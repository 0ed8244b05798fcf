//! In-memory connector for exercising the relay without a network.
//!
//! # Example
//!
//! ```ignore
//! let (connector, controller) = FakeConnector::pair();
//! let handle = RelayHost::new(Identity::ephemeral(), ReconnectPolicy::default(), Arc::new(connector)).spawn();
//!
//! // ... a context sends Init ...
//! let link = controller.latest_link().unwrap();
//! link.inject_event(&WireEvent::UserJoined(presence));
//! assert_eq!(link.sent()[0]["event"], "join_room");
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tabrelay_protocol::WireEvent;
use tokio::sync::mpsc;

use crate::connection::CloseReason;
use crate::error::{RelayError, Result};
use crate::transport::{Connector, Transport, TransportParts, TransportReceiver};

#[derive(Default)]
struct FakeState {
	dials: Vec<String>,
	failures: VecDeque<String>,
	links: Vec<FakeLink>,
}

/// [`Connector`] whose links are driven by a [`FakeController`].
pub struct FakeConnector {
	state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
	/// Creates a connector and the controller that drives its links.
	pub fn pair() -> (FakeConnector, FakeController) {
		let state = Arc::new(Mutex::new(FakeState::default()));
		(FakeConnector { state: Arc::clone(&state) }, FakeController { state })
	}
}

impl Connector for FakeConnector {
	fn dial(&self, endpoint: &str) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>> {
		let endpoint = endpoint.to_string();
		Box::pin(async move {
			let mut state = self.state.lock();
			state.dials.push(endpoint.clone());
			if let Some(detail) = state.failures.pop_front() {
				return Err(RelayError::Transport(detail));
			}

			let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
			let (message_tx, message_rx) = mpsc::unbounded_channel();
			let link = FakeLink {
				endpoint,
				inbound_tx,
				sent: Arc::new(Mutex::new(Vec::new())),
				closed_by_client: Arc::new(AtomicBool::new(false)),
			};

			let parts = TransportParts {
				sender: Box::new(FakeSender {
					sent: Arc::clone(&link.sent),
					closed_by_client: Arc::clone(&link.closed_by_client),
				}),
				receiver: Box::new(FakeReceiver { inbound_rx, message_tx }),
				message_rx,
			};
			state.links.push(link);
			Ok(parts)
		})
	}
}

/// Test-side handle for scripting dials and links.
#[derive(Clone)]
pub struct FakeController {
	state: Arc<Mutex<FakeState>>,
}

impl FakeController {
	/// Endpoints dialed so far, in order, including failed dials.
	pub fn dials(&self) -> Vec<String> {
		self.state.lock().dials.clone()
	}

	/// Makes the next dial fail with `detail`.
	pub fn fail_next_dial(&self, detail: &str) {
		self.state.lock().failures.push_back(detail.to_string());
	}

	/// Established links, in dial order.
	pub fn links(&self) -> Vec<FakeLink> {
		self.state.lock().links.clone()
	}

	pub fn latest_link(&self) -> Option<FakeLink> {
		self.state.lock().links.last().cloned()
	}
}

enum LinkInput {
	Frame(JsonValue),
	End(std::result::Result<CloseReason, String>),
}

/// One fake link: inject server frames, end it, inspect what the relay sent.
#[derive(Clone)]
pub struct FakeLink {
	endpoint: String,
	inbound_tx: mpsc::UnboundedSender<LinkInput>,
	sent: Arc<Mutex<Vec<JsonValue>>>,
	closed_by_client: Arc<AtomicBool>,
}

impl FakeLink {
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Delivers a raw frame as if the server sent it.
	pub fn inject(&self, frame: JsonValue) {
		let _ = self.inbound_tx.send(LinkInput::Frame(frame));
	}

	pub fn inject_event(&self, event: &WireEvent) {
		if let Ok(frame) = serde_json::to_value(event) {
			self.inject(frame);
		}
	}

	/// Ends the link with an orderly close from the server.
	pub fn close_from_server(&self) {
		let _ = self.inbound_tx.send(LinkInput::End(Ok(CloseReason::ServerClose)));
	}

	/// Drops the link without a close handshake.
	pub fn drop_link(&self, detail: &str) {
		let _ = self.inbound_tx.send(LinkInput::End(Err(detail.to_string())));
	}

	/// Frames the relay has sent on this link.
	pub fn sent(&self) -> Vec<JsonValue> {
		self.sent.lock().clone()
	}

	pub fn take_sent(&self) -> Vec<JsonValue> {
		std::mem::take(&mut *self.sent.lock())
	}

	/// `true` once the relay closed this link itself.
	pub fn is_closed_by_client(&self) -> bool {
		self.closed_by_client.load(Ordering::SeqCst)
	}
}

struct FakeSender {
	sent: Arc<Mutex<Vec<JsonValue>>>,
	closed_by_client: Arc<AtomicBool>,
}

impl Transport for FakeSender {
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			if self.closed_by_client.load(Ordering::SeqCst) {
				return Err(RelayError::Transport("link closed".into()));
			}
			self.sent.lock().push(message);
			Ok(())
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.closed_by_client.store(true, Ordering::SeqCst);
			Ok(())
		})
	}
}

struct FakeReceiver {
	inbound_rx: mpsc::UnboundedReceiver<LinkInput>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl TransportReceiver for FakeReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<CloseReason>> + Send>> {
		Box::pin(async move {
			while let Some(input) = self.inbound_rx.recv().await {
				match input {
					LinkInput::Frame(frame) => {
						if self.message_tx.send(frame).is_err() {
							return Ok(CloseReason::ClientClose);
						}
					}
					LinkInput::End(Ok(reason)) => return Ok(reason),
					LinkInput::End(Err(detail)) => return Err(RelayError::Transport(detail)),
				}
			}
			Err(RelayError::Transport("fake link dropped".into()))
		})
	}
}
