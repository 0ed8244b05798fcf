//! WebSocket transport for the chat service.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::connection::CloseReason;
use crate::error::{RelayError, Result};
use crate::transport::{Connector, Transport, TransportParts, TransportReceiver};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established WebSocket link, not yet split into transport halves.
pub struct WebSocketTransport {
	sink: SplitSink<WsStream, Message>,
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl WebSocketTransport {
	/// Opens a WebSocket to `endpoint`. `http(s)` endpoints are dialed as `ws(s)`.
	pub async fn connect(endpoint: &str) -> Result<(Self, mpsc::UnboundedReceiver<JsonValue>)> {
		let url = websocket_url(endpoint);
		debug!(target = "tabrelay.transport", url = %url, "opening websocket");
		let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
		let (sink, stream) = ws.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		Ok((Self { sink, stream, message_tx }, message_rx))
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<JsonValue>) -> TransportParts {
		TransportParts {
			sender: Box::new(WebSocketSender { sink: self.sink }),
			receiver: Box::new(WebSocketReceiver {
				stream: self.stream,
				message_tx: self.message_tx,
			}),
			message_rx,
		}
	}
}

/// Maps an HTTP base URL onto the matching WebSocket scheme.
pub fn websocket_url(endpoint: &str) -> String {
	if let Some(rest) = endpoint.strip_prefix("https://") {
		format!("wss://{rest}")
	} else if let Some(rest) = endpoint.strip_prefix("http://") {
		format!("ws://{rest}")
	} else {
		endpoint.to_string()
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink.send(Message::Text(text.into())).await?;
			Ok(())
		})
	}

	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.sink.close().await?;
			Ok(())
		})
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<CloseReason>> + Send>> {
		Box::pin(async move {
			let WebSocketReceiver { mut stream, message_tx } = *self;
			while let Some(frame) = stream.next().await {
				match frame? {
					Message::Text(text) => match serde_json::from_str::<JsonValue>(&text) {
						Ok(value) => {
							if message_tx.send(value).is_err() {
								return Ok(CloseReason::ClientClose);
							}
						}
						Err(err) => warn!(target = "tabrelay.transport", error = %err, "dropping non-JSON frame"),
					},
					Message::Close(frame) => {
						debug!(target = "tabrelay.transport", frame = ?frame, "server closed websocket");
						return Ok(CloseReason::ServerClose);
					}
					_ => {}
				}
			}
			Err(RelayError::Transport("connection dropped without close frame".into()))
		})
	}
}

/// Production [`Connector`] dialing WebSocket endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
	fn dial(&self, endpoint: &str) -> Pin<Box<dyn Future<Output = Result<TransportParts>> + Send + '_>> {
		let endpoint = endpoint.to_string();
		Box::pin(async move {
			let (transport, message_rx) = WebSocketTransport::connect(&endpoint).await?;
			Ok(transport.into_transport_parts(message_rx))
		})
	}
}
