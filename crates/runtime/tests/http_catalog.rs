//! REST media catalog and contract dispatch against a local axum backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tabrelay_protocol::ContractCall;
use tabrelay_runtime::{ContractDispatcher, EndpointSlot, HttpMediaCatalog, MediaCatalog, MemoryMediaCache, RelayError};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Backend {
	downloads: Arc<AtomicUsize>,
}

async fn list() -> Json<Value> {
	Json(json!({ "success": true, "media": [{ "id": "m1", "name": "clip.mp4", "size": 4 }] }))
}

async fn metadata(Path(id): Path<String>) -> impl IntoResponse {
	if id == "m1" {
		(StatusCode::OK, Json(json!({ "success": true, "metadata": { "id": "m1", "name": "clip.mp4", "size": 4 } })))
	} else {
		(StatusCode::OK, Json(json!({ "success": false, "error": "Media not found" })))
	}
}

async fn download(State(backend): State<Backend>, Path(id): Path<String>) -> impl IntoResponse {
	backend.downloads.fetch_add(1, Ordering::SeqCst);
	if id == "m1" {
		(StatusCode::OK, b"data".to_vec())
	} else {
		(StatusCode::NOT_FOUND, Vec::new())
	}
}

async fn serve(backend: Backend) -> String {
	let app = Router::new()
		.route("/api/media", get(list))
		.route("/api/media/{id}/metadata", get(metadata))
		.route("/api/media/{id}", get(download))
		.with_state(backend);
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	format!("http://{addr}/")
}

fn call(method: &str, params: Value) -> ContractCall {
	ContractCall {
		target_id: "cinema-player".into(),
		method: method.into(),
		params,
		call_id: Some("c1".into()),
	}
}

#[tokio::test]
async fn catalog_reads_the_backend_rest_api() {
	let endpoint = serve(Backend::default()).await;
	let catalog = HttpMediaCatalog::new().unwrap();

	let media = catalog.list(&endpoint).await.unwrap();
	assert_eq!(media[0]["id"], "m1");

	let metadata = catalog.metadata(&endpoint, "m1").await.unwrap();
	assert_eq!(metadata["name"], "clip.mp4");
	assert_eq!(catalog.fetch(&endpoint, "m1").await.unwrap(), b"data");

	let err = catalog.metadata(&endpoint, "missing").await.unwrap_err();
	assert!(matches!(err, RelayError::Backend(msg) if msg == "Media not found"));
	assert!(matches!(catalog.fetch(&endpoint, "missing").await, Err(RelayError::Backend(_))));
}

#[tokio::test]
async fn get_media_downloads_once_then_serves_from_cache() {
	let backend = Backend::default();
	let endpoint = serve(backend.clone()).await;
	let dispatcher = ContractDispatcher::new(
		"cinema-player",
		Arc::new(HttpMediaCatalog::new().unwrap()),
		Arc::new(MemoryMediaCache::new()),
		Arc::new(EndpointSlot::new(Some(endpoint))),
	);

	let request = call("getMedia", json!({ "mediaId": "m1" }));
	let first = dispatcher.handle(&request).await.unwrap();
	let second = dispatcher.handle(&request).await.unwrap();

	assert_eq!(first.call_id.as_deref(), Some("c1"));
	assert_eq!(first.result["data"], "ZGF0YQ==");
	assert_eq!(first.result["metadata"]["size"], 4);
	assert_eq!(second.result, first.result);
	assert_eq!(backend.downloads.load(Ordering::SeqCst), 1);

	let missing = dispatcher.handle(&call("getMedia", json!({ "mediaId": "nope" }))).await.unwrap();
	assert_eq!(missing.error.as_deref(), Some("Media not found"));
}
