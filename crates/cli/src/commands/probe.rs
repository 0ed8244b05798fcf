use anyhow::Context;
use tabrelay_runtime::RelayConfig;

use crate::probe::{HEALTH_TIMEOUT, detect_endpoint, health_client, probe_health};

pub async fn execute(config: &RelayConfig, url: Option<String>, local: Option<String>, production: Option<String>) -> anyhow::Result<()> {
	let client = health_client(HEALTH_TIMEOUT).context("failed to create HTTP client")?;

	let output = match url {
		Some(url) => serde_json::to_string_pretty(&probe_health(&client, &url).await)?,
		None => {
			let local = local.unwrap_or_else(|| config.local_url.clone());
			let production = production.unwrap_or_else(|| config.production_url.clone());
			serde_json::to_string_pretty(&detect_endpoint(&client, &local, &production).await)?
		}
	};
	println!("{output}");
	Ok(())
}
