//! Relay configuration file.
//!
//! Read from `<config_dir>/tabrelay/config.json` unless a path is given. A
//! missing or unreadable file yields the defaults; `TABRELAY_ENDPOINT`
//! overrides the configured endpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backoff::ReconnectPolicy;
use crate::error::Result;

pub const ENDPOINT_ENV: &str = "TABRELAY_ENDPOINT";
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:3000";
pub const DEFAULT_PRODUCTION_URL: &str = "https://ord-extension-backend-production.up.railway.app";
pub const DEFAULT_APP_ID: &str = "cinema-player";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
	/// Chat service endpoint. Detected from the local and production URLs when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	pub local_url: String,
	pub production_url: String,
	pub reconnect: ReconnectPolicy,
	/// Where the identity is persisted. Defaults to `identity.json` next to the config file.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub identity_path: Option<PathBuf>,
	/// Application id contract calls must be addressed to.
	pub app_id: String,
	pub bridge_max_depth: usize,
	pub endpoint_wait_ms: u64,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			endpoint: None,
			local_url: DEFAULT_LOCAL_URL.to_string(),
			production_url: DEFAULT_PRODUCTION_URL.to_string(),
			reconnect: ReconnectPolicy::default(),
			identity_path: None,
			app_id: DEFAULT_APP_ID.to_string(),
			bridge_max_depth: 32,
			endpoint_wait_ms: 5_000,
		}
	}
}

impl RelayConfig {
	/// Loads `path`, or the default location when `None`, then applies the
	/// environment override.
	pub fn load(path: Option<&Path>) -> Self {
		let path = path.map(Path::to_path_buf).or_else(default_config_path);
		let config = path.as_deref().map(Self::load_file).unwrap_or_default();
		config.with_endpoint_override(std::env::var(ENDPOINT_ENV).ok())
	}

	/// Reads one file, falling back to defaults when it is missing or malformed.
	pub fn load_file(path: &Path) -> Self {
		let Ok(content) = fs::read_to_string(path) else {
			return Self::default();
		};
		serde_json::from_str(&content).unwrap_or_else(|err| {
			warn!(target = "tabrelay.config", path = %path.display(), error = %err, "ignoring malformed config");
			Self::default()
		})
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, serde_json::to_string_pretty(self)?)?;
		Ok(())
	}

	/// Replaces the endpoint with `value` when it is a non-empty string.
	pub fn with_endpoint_override(mut self, value: Option<String>) -> Self {
		if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
			self.endpoint = Some(value);
		}
		self
	}

	pub fn endpoint_wait(&self) -> Duration {
		Duration::from_millis(self.endpoint_wait_ms)
	}

	pub fn identity_path(&self) -> Option<PathBuf> {
		self.identity_path.clone().or_else(|| config_dir().map(|dir| dir.join("identity.json")))
	}
}

fn config_dir() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("tabrelay"))
}

pub fn default_config_path() -> Option<PathBuf> {
	config_dir().map(|dir| dir.join("config.json"))
}
