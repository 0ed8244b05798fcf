//! Serving contract calls in a tab's top frame.
//!
//! The application running in a tab talks to the relay by posting
//! [`ContractCall`]s through the frame bridge. [`ContractDispatcher`] answers
//! the media methods itself and forwards the chat methods to the relay host as
//! context commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value as JsonValue, json};
use tabrelay_protocol::{ContextCommand, ContextId, ContractCall, ContractResponse, RoomId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::host::RelayHandle;
use crate::media::{CachedMedia, MediaCache, MediaCatalog};

/// Error returned for every call once the hosting extension was reloaded.
pub const INVALIDATED_MESSAGE: &str = "Extension was reloaded. Please refresh the page.";

/// Backend endpoint that may be configured after calls start arriving.
#[derive(Debug)]
pub struct EndpointSlot {
	tx: watch::Sender<Option<String>>,
}

impl EndpointSlot {
	pub fn new(initial: Option<String>) -> Self {
		let (tx, _rx) = watch::channel(initial);
		Self { tx }
	}

	pub fn set(&self, endpoint: impl Into<String>) {
		self.tx.send_replace(Some(endpoint.into()));
	}

	pub fn current(&self) -> Option<String> {
		self.tx.borrow().clone()
	}

	/// Waits up to `limit` for an endpoint to be set.
	pub async fn wait(&self, limit: Duration) -> Result<String> {
		let mut rx = self.tx.subscribe();
		let endpoint = tokio::time::timeout(limit, rx.wait_for(Option::is_some))
			.await
			.map_err(|_| RelayError::EndpointTimeout)?
			.map_err(|_| RelayError::ChannelClosed)?;
		endpoint.clone().ok_or(RelayError::EndpointTimeout)
	}
}

/// Route from the dispatcher to the relay host.
#[derive(Clone)]
struct RelayRoute {
	handle: RelayHandle,
	context: ContextId,
}

/// Answers contract calls addressed to one application.
pub struct ContractDispatcher {
	app_id: String,
	catalog: Arc<dyn MediaCatalog>,
	cache: Arc<dyn MediaCache>,
	endpoint: Arc<EndpointSlot>,
	endpoint_wait: Duration,
	relay: Option<RelayRoute>,
	invalidated: AtomicBool,
}

impl ContractDispatcher {
	pub fn new(app_id: impl Into<String>, catalog: Arc<dyn MediaCatalog>, cache: Arc<dyn MediaCache>, endpoint: Arc<EndpointSlot>) -> Self {
		Self {
			app_id: app_id.into(),
			catalog,
			cache,
			endpoint,
			endpoint_wait: Duration::from_secs(5),
			relay: None,
			invalidated: AtomicBool::new(false),
		}
	}

	pub fn with_endpoint_wait(mut self, wait: Duration) -> Self {
		self.endpoint_wait = wait;
		self
	}

	/// Forwards chat methods to the relay as commands from `context`.
	pub fn with_relay(mut self, handle: RelayHandle, context: ContextId) -> Self {
		self.relay = Some(RelayRoute { handle, context });
		self
	}

	/// Marks the hosting extension as reloaded. Every later call fails.
	pub fn invalidate(&self) {
		warn!(target = "tabrelay.contract", "extension context invalidated");
		self.invalidated.store(true, Ordering::SeqCst);
	}

	pub fn is_invalidated(&self) -> bool {
		self.invalidated.load(Ordering::SeqCst)
	}

	/// Serves `call`. Returns `None` for calls addressed elsewhere and for
	/// methods that have no response.
	pub async fn handle(&self, call: &ContractCall) -> Option<ContractResponse> {
		if call.target_id != self.app_id {
			return None;
		}
		info!(target = "tabrelay.contract", method = %call.method, "contract call");

		if self.is_invalidated() {
			return Some(ContractResponse::err(call, INVALIDATED_MESSAGE));
		}

		let result = match call.method.as_str() {
			"listMedia" => self.list_media().await,
			"getMedia" => match param(call, "mediaId") {
				Ok(media_id) => self.get_media(&media_id).await,
				Err(err) => Err(err),
			},
			"joinChatRoom" => {
				self.forward(call, "roomId", |room| ContextCommand::JoinRoom { room_id: RoomId::new(room) });
				return None;
			}
			"sendChatMessage" => {
				self.forward(call, "message", |text| ContextCommand::SendMessage { text });
				return None;
			}
			other => Err(RelayError::Protocol(format!("Unknown method: {other}"))),
		};

		Some(match result {
			Ok(value) => ContractResponse::ok(call, value),
			Err(err) => {
				warn!(target = "tabrelay.contract", method = %call.method, error = %err, "contract call failed");
				ContractResponse::err(call, error_message(&err))
			}
		})
	}

	async fn list_media(&self) -> Result<JsonValue> {
		let endpoint = self.endpoint.wait(self.endpoint_wait).await?;
		let media = self.catalog.list(&endpoint).await?;
		debug!(target = "tabrelay.contract", count = media.len(), "media listed");
		Ok(json!({ "media": media }))
	}

	async fn get_media(&self, media_id: &str) -> Result<JsonValue> {
		if let Some(cached) = self.cache.get(media_id).await {
			debug!(target = "tabrelay.contract", media_id, "served from cache");
			return Ok(media_result(&cached));
		}

		let endpoint = self.endpoint.wait(self.endpoint_wait).await?;
		let metadata = self.catalog.metadata(&endpoint, media_id).await?;
		let bytes = self.catalog.fetch(&endpoint, media_id).await?;
		debug!(target = "tabrelay.contract", media_id, size = bytes.len(), "downloaded");

		let media = CachedMedia { metadata, bytes };
		let result = media_result(&media);
		self.cache.put(media_id, media).await;
		Ok(result)
	}

	fn forward(&self, call: &ContractCall, key: &str, command: impl FnOnce(String) -> ContextCommand) {
		let Some(route) = &self.relay else {
			debug!(target = "tabrelay.contract", method = %call.method, "no relay attached");
			return;
		};
		let sent = param(call, key).and_then(|value| route.handle.command(route.context, command(value)));
		if let Err(err) = sent {
			warn!(target = "tabrelay.contract", method = %call.method, error = %err, "cannot forward to relay");
		}
	}
}

fn param(call: &ContractCall, key: &str) -> Result<String> {
	call.params
		.get(key)
		.and_then(JsonValue::as_str)
		.map(str::to_string)
		.ok_or_else(|| RelayError::Protocol(format!("Missing parameter: {key}")))
}

fn media_result(media: &CachedMedia) -> JsonValue {
	json!({
		"data": STANDARD.encode(&media.bytes),
		"metadata": media.metadata,
		"isBase64": true,
	})
}

/// Message shown to the application. Protocol errors carry their text bare.
fn error_message(err: &RelayError) -> String {
	match err {
		RelayError::Protocol(message) | RelayError::Backend(message) => message.clone(),
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use async_trait::async_trait;

	use super::*;
	use crate::media::MemoryMediaCache;

	#[derive(Default)]
	struct StubCatalog {
		fetches: AtomicUsize,
	}

	#[async_trait]
	impl MediaCatalog for StubCatalog {
		async fn list(&self, endpoint: &str) -> Result<Vec<JsonValue>> {
			Ok(vec![json!({ "id": "m1", "from": endpoint })])
		}

		async fn metadata(&self, _endpoint: &str, media_id: &str) -> Result<JsonValue> {
			Ok(json!({ "id": media_id, "name": "clip.mp4" }))
		}

		async fn fetch(&self, _endpoint: &str, _media_id: &str) -> Result<Vec<u8>> {
			self.fetches.fetch_add(1, Ordering::SeqCst);
			Ok(b"abc".to_vec())
		}
	}

	fn call(method: &str, params: JsonValue) -> ContractCall {
		ContractCall {
			target_id: "cinema-player".into(),
			method: method.into(),
			params,
			call_id: None,
		}
	}

	fn dispatcher(endpoint: Option<&str>) -> (ContractDispatcher, Arc<StubCatalog>, Arc<EndpointSlot>) {
		let catalog = Arc::new(StubCatalog::default());
		let slot = Arc::new(EndpointSlot::new(endpoint.map(str::to_string)));
		let dispatcher = ContractDispatcher::new("cinema-player", catalog.clone(), Arc::new(MemoryMediaCache::new()), slot.clone())
			.with_endpoint_wait(Duration::from_millis(50));
		(dispatcher, catalog, slot)
	}

	#[tokio::test]
	async fn list_media_wraps_catalog_entries() {
		let (dispatcher, _, _) = dispatcher(Some("http://backend"));
		let response = dispatcher.handle(&call("listMedia", json!({}))).await.unwrap();
		assert!(!response.is_error());
		assert_eq!(response.result, json!({ "media": [{ "id": "m1", "from": "http://backend" }] }));
	}

	#[tokio::test]
	async fn get_media_is_cached_after_first_fetch() {
		let (dispatcher, catalog, _) = dispatcher(Some("http://backend"));
		let request = call("getMedia", json!({ "mediaId": "m1" }));

		let first = dispatcher.handle(&request).await.unwrap();
		let second = dispatcher.handle(&request).await.unwrap();

		assert_eq!(first.result["data"], "YWJj");
		assert_eq!(first.result["isBase64"], true);
		assert_eq!(first.result, second.result);
		assert_eq!(catalog.fetches.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unknown_methods_and_missing_params_are_errors() {
		let (dispatcher, _, _) = dispatcher(Some("http://backend"));
		let response = dispatcher.handle(&call("dance", json!({}))).await.unwrap();
		assert_eq!(response.error.as_deref(), Some("Unknown method: dance"));

		let response = dispatcher.handle(&call("getMedia", json!({}))).await.unwrap();
		assert_eq!(response.error.as_deref(), Some("Missing parameter: mediaId"));
	}

	#[tokio::test]
	async fn calls_for_other_targets_get_no_response() {
		let (dispatcher, _, _) = dispatcher(Some("http://backend"));
		let mut other = call("listMedia", json!({}));
		other.target_id = "someone-else".into();
		assert!(dispatcher.handle(&other).await.is_none());
	}

	#[tokio::test]
	async fn invalidated_dispatcher_refuses_everything() {
		let (dispatcher, _, _) = dispatcher(Some("http://backend"));
		dispatcher.invalidate();
		for method in ["listMedia", "joinChatRoom", "dance"] {
			let response = dispatcher.handle(&call(method, json!({ "roomId": "lobby" }))).await.unwrap();
			assert_eq!(response.error.as_deref(), Some(INVALIDATED_MESSAGE));
		}
	}

	#[tokio::test]
	async fn missing_endpoint_times_out() {
		let (dispatcher, _, _) = dispatcher(None);
		let response = dispatcher.handle(&call("listMedia", json!({}))).await.unwrap();
		assert_eq!(response.error.as_deref(), Some("Backend URL not initialized"));
	}

	#[tokio::test]
	async fn late_endpoint_is_picked_up() {
		let (dispatcher, _, slot) = dispatcher(None);
		let dispatcher = dispatcher.with_endpoint_wait(Duration::from_secs(5));
		let setter = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			slot.set("http://late");
		});

		let response = dispatcher.handle(&call("listMedia", json!({}))).await.unwrap();
		setter.await.unwrap();
		assert_eq!(response.result["media"][0]["from"], "http://late");
	}

	#[tokio::test]
	async fn chat_methods_have_no_response() {
		let (dispatcher, _, _) = dispatcher(Some("http://backend"));
		assert!(dispatcher.handle(&call("joinChatRoom", json!({ "roomId": "lobby" }))).await.is_none());
		assert!(dispatcher.handle(&call("sendChatMessage", json!({ "message": "hi" }))).await.is_none());
	}
}
