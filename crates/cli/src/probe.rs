//! Backend health probing and endpoint selection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How long a single health check may take.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// `/health` response subset.
#[derive(Debug, Deserialize)]
struct HealthBody {
	status: String,
}

/// Outcome of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
	pub url: String,
	pub healthy: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Endpoint chosen by [`detect_endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detected {
	pub url: String,
	pub local: bool,
	pub probes: Vec<ProbeReport>,
}

pub fn health_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
	reqwest::Client::builder().timeout(timeout).build()
}

/// `GET {url}/health`; healthy iff it answers `{"status":"ok"}`.
pub async fn probe_health(client: &reqwest::Client, url: &str) -> ProbeReport {
	let health_url = format!("{}/health", url.trim_end_matches('/'));
	let outcome = check_health(client, &health_url).await;

	debug!(target = "tabrelay.probe", url = %health_url, healthy = outcome.is_ok(), "health probe");
	ProbeReport {
		url: url.to_string(),
		healthy: outcome.is_ok(),
		error: outcome.err(),
	}
}

async fn check_health(client: &reqwest::Client, health_url: &str) -> Result<(), String> {
	let response = client.get(health_url).send().await.map_err(|e| e.to_string())?;
	if !response.status().is_success() {
		return Err(format!("unexpected status {}", response.status()));
	}
	let body: HealthBody = response.json().await.map_err(|e| e.to_string())?;
	if body.status == "ok" {
		Ok(())
	} else {
		Err(format!("status {}", body.status))
	}
}

/// Prefers `local` when it is healthy, otherwise falls back to `production`.
pub async fn detect_endpoint(client: &reqwest::Client, local: &str, production: &str) -> Detected {
	let local_report = probe_health(client, local).await;
	if local_report.healthy {
		return Detected {
			url: local.to_string(),
			local: true,
			probes: vec![local_report],
		};
	}

	let production_report = probe_health(client, production).await;
	Detected {
		url: production.to_string(),
		local: false,
		probes: vec![local_report, production_report],
	}
}
