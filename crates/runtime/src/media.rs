//! Media collaborators used by the contract dispatcher.
//!
//! The relay never stores media itself. [`MediaCatalog`] lists and fetches
//! objects from the backend; [`MediaCache`] keeps fetched objects so repeat
//! requests cost no bandwidth.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{RelayError, Result};

/// A media object held in a [`MediaCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMedia {
	pub metadata: JsonValue,
	pub bytes: Vec<u8>,
}

/// Read access to the backend's media store.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
	async fn list(&self, endpoint: &str) -> Result<Vec<JsonValue>>;

	async fn metadata(&self, endpoint: &str, media_id: &str) -> Result<JsonValue>;

	async fn fetch(&self, endpoint: &str, media_id: &str) -> Result<Vec<u8>>;
}

/// Local store of fetched media.
#[async_trait]
pub trait MediaCache: Send + Sync {
	async fn get(&self, media_id: &str) -> Option<CachedMedia>;

	async fn put(&self, media_id: &str, media: CachedMedia);
}

/// Process-local [`MediaCache`].
#[derive(Debug, Default)]
pub struct MemoryMediaCache {
	entries: RwLock<HashMap<String, CachedMedia>>,
}

impl MemoryMediaCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[async_trait]
impl MediaCache for MemoryMediaCache {
	async fn get(&self, media_id: &str) -> Option<CachedMedia> {
		self.entries.read().get(media_id).cloned()
	}

	async fn put(&self, media_id: &str, media: CachedMedia) {
		self.entries.write().insert(media_id.to_string(), media);
	}
}

/// Backend envelope: `{ success, error?, ...payload }`.
#[derive(Debug, Deserialize)]
struct Envelope {
	#[serde(default)]
	success: bool,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	media: Option<Vec<JsonValue>>,
	#[serde(default)]
	metadata: Option<JsonValue>,
}

impl Envelope {
	fn into_result(self, fallback: &str) -> Result<Self> {
		if self.success {
			Ok(self)
		} else {
			Err(RelayError::Backend(self.error.unwrap_or_else(|| fallback.to_string())))
		}
	}
}

/// [`MediaCatalog`] speaking the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpMediaCatalog {
	client: reqwest::Client,
}

impl HttpMediaCatalog {
	pub fn new() -> Result<Self> {
		let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
		Ok(Self { client })
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}

	async fn get(&self, url: String) -> Result<reqwest::Response> {
		debug!(target = "tabrelay.contract", %url, "backend request");
		let response = self.client.get(&url).send().await?;
		let status = response.status();
		if !status.is_success() {
			return Err(RelayError::Backend(format!("{url} returned {status}")));
		}
		Ok(response)
	}
}

fn base(endpoint: &str) -> &str {
	endpoint.trim_end_matches('/')
}

#[async_trait]
impl MediaCatalog for HttpMediaCatalog {
	async fn list(&self, endpoint: &str) -> Result<Vec<JsonValue>> {
		let envelope: Envelope = self.get(format!("{}/api/media", base(endpoint))).await?.json().await?;
		Ok(envelope.into_result("Failed to fetch media list")?.media.unwrap_or_default())
	}

	async fn metadata(&self, endpoint: &str, media_id: &str) -> Result<JsonValue> {
		let envelope: Envelope = self.get(format!("{}/api/media/{media_id}/metadata", base(endpoint))).await?.json().await?;
		envelope
			.into_result("Failed to fetch metadata")?
			.metadata
			.ok_or_else(|| RelayError::Backend("metadata missing from response".into()))
	}

	async fn fetch(&self, endpoint: &str, media_id: &str) -> Result<Vec<u8>> {
		let bytes = self.get(format!("{}/api/media/{media_id}", base(endpoint))).await?.bytes().await?;
		Ok(bytes.to_vec())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn memory_cache_round_trip() {
		let cache = MemoryMediaCache::new();
		assert!(cache.get("m1").await.is_none());

		let media = CachedMedia {
			metadata: json!({ "name": "clip.mp4", "size": 3 }),
			bytes: vec![1, 2, 3],
		};
		cache.put("m1", media.clone()).await;
		assert_eq!(cache.get("m1").await, Some(media));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn failed_envelope_uses_backend_message_or_fallback() {
		let envelope: Envelope = serde_json::from_value(json!({ "success": false, "error": "nope" })).unwrap();
		assert!(matches!(envelope.into_result("fallback"), Err(RelayError::Backend(msg)) if msg == "nope"));

		let envelope: Envelope = serde_json::from_value(json!({})).unwrap();
		assert!(matches!(envelope.into_result("fallback"), Err(RelayError::Backend(msg)) if msg == "fallback"));
	}

	#[test]
	fn endpoint_trailing_slash_is_ignored() {
		assert_eq!(base("http://localhost:3000/"), "http://localhost:3000");
		assert_eq!(base("http://localhost:3000"), "http://localhost:3000");
	}
}
