//! Transport seam between the relay host and the network.
//!
//! A [`Connector`] dials an endpoint and hands back [`TransportParts`]: a
//! sending half, a receiving half that must be driven with
//! [`TransportReceiver::run`], and the channel the receiver feeds with decoded
//! JSON frames. The production connector speaks WebSocket
//! ([`WebSocketConnector`](crate::websocket::WebSocketConnector)); tests use
//! [`FakeConnector`](crate::fake_transport::FakeConnector).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::connection::CloseReason;
use crate::error::Result;

/// Sending half of a link.
pub trait Transport: Send {
	/// Sends one JSON frame.
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

	/// Closes the link with a close handshake where the transport has one.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a link.
pub trait TransportReceiver: Send {
	/// Reads frames into the paired channel until the link ends.
	///
	/// Resolves with the close reason on an orderly close and with an error
	/// when the link drops.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<CloseReason>> + Send>>;
}

/// The pieces of one established link.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<JsonValue>,
}

/// Dials endpoints.
pub trait Connector: Send + Sync {
	fn dial(&self, endpoint: &str) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>>;
}
